use std::{sync::Arc, time::Duration};

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    bulk::{ActionKind, BatchReport, BulkActionCoordinator, Selection},
    client::DashboardClient,
    config::{
        Cli, Command, Config, CopyIssueArgs, JobsCommand, NoticeArgs, ProblemsCommand,
        RecurringJobsCommand, SelectionArgs, WatchArgs,
    },
    dashboard::Dashboard,
    domain::{JobStats, Problem, RecurringJob, ServerStatus},
    notice::job_notice,
    poller::PollerOptions,
    problems::{
        Clipboard, CommandClipboard, CopyOutcome, DismissOutcome, copy_issue_report,
        dismiss_severe_exception,
    },
    store::{Observer, Snapshot, Subscription, observer},
};

pub const EXIT_INVALID_ARGS: i32 = 2;
pub const EXIT_API: i32 = 3;
pub const EXIT_ACTION_FAILED: i32 = 4;

#[derive(Debug)]
pub struct ExitError {
    pub code: i32,
    pub message: String,
}

impl ExitError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn api(context: &str, err: anyhow::Error) -> Self {
        Self::new(EXIT_API, format!("api_error: {context}: {err:#}"))
    }
}

pub async fn run() -> i32 {
    let cli = Cli::parse();

    let res = match DashboardClient::from_config(&cli.config) {
        Ok(client) => dispatch(&cli.config, client, cli.command).await,
        Err(e) => Err(ExitError::new(
            EXIT_INVALID_ARGS,
            format!("invalid_args: {e:#}"),
        )),
    };

    match res {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{}", e.message);
            e.code
        }
    }
}

async fn dispatch(
    config: &Config,
    client: DashboardClient,
    command: Command,
) -> Result<(), ExitError> {
    match command {
        Command::Watch(args) => cmd_watch(config, client, args).await,
        Command::RecurringJobs(cmd) => match cmd {
            RecurringJobsCommand::List => cmd_recurring_jobs_list(config, &client).await,
            RecurringJobsCommand::Delete(args) => {
                cmd_bulk(config, client, args, ActionKind::Delete).await
            }
            RecurringJobsCommand::Trigger(args) => {
                cmd_bulk(config, client, args, ActionKind::Trigger).await
            }
            RecurringJobsCommand::Enable(args) => {
                cmd_bulk(config, client, args, ActionKind::Enable).await
            }
            RecurringJobsCommand::Disable(args) => {
                cmd_bulk(config, client, args, ActionKind::Disable).await
            }
        },
        Command::Jobs(JobsCommand::Notice(args)) => cmd_job_notice(config, &client, args).await,
        Command::Problems(cmd) => match cmd {
            ProblemsCommand::DismissSevere => cmd_dismiss_severe(config, &client).await,
            ProblemsCommand::CopyIssue(args) => cmd_copy_issue(config, &client, args).await,
        },
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), ExitError> {
    let s = serde_json::to_string_pretty(value)
        .map_err(|e| ExitError::new(1, format!("serialize output: {e}")))?;
    println!("{s}");
    Ok(())
}

type WatchSubscriptions = (
    Subscription<JobStats>,
    Subscription<Vec<ServerStatus>>,
    Subscription<Vec<Problem>>,
);

/// Prints every snapshot a store publishes and wakes `loaded` after each one.
fn watch_observer<T, R>(
    json: bool,
    store: &'static str,
    render: R,
    loaded: Arc<Notify>,
) -> Observer<T>
where
    T: Serialize + Send + Sync + 'static,
    R: Fn(&T) -> String + Send + Sync + 'static,
{
    observer(move |value: &Arc<T>| {
        let value: &T = value;
        print_snapshot(json, store, value, || render(value));
        loaded.notify_one();
    })
}

fn watch_dashboard(dashboard: &Dashboard, json: bool, loaded: &Arc<Notify>) -> WatchSubscriptions {
    (
        dashboard.job_stats.subscribe_scoped(watch_observer(
            json,
            dashboard.job_stats.name(),
            render_job_stats,
            Arc::clone(loaded),
        )),
        dashboard.servers.subscribe_scoped(watch_observer(
            json,
            dashboard.servers.name(),
            |servers: &Vec<ServerStatus>| render_servers(servers),
            Arc::clone(loaded),
        )),
        dashboard.problems.subscribe_scoped(watch_observer(
            json,
            dashboard.problems.name(),
            |problems: &Vec<Problem>| render_problems(problems),
            Arc::clone(loaded),
        )),
    )
}

fn missing_stores(dashboard: &Dashboard) -> Vec<&'static str> {
    [
        (dashboard.job_stats.name(), dashboard.job_stats.current().is_loaded()),
        (dashboard.servers.name(), dashboard.servers.current().is_loaded()),
        (dashboard.problems.name(), dashboard.problems.current().is_loaded()),
    ]
    .into_iter()
    .filter(|(_, loaded)| !loaded)
    .map(|(name, _)| name)
    .collect()
}

/// Resolves once every store holds a snapshot.
async fn wait_until_loaded(dashboard: &Dashboard, loaded: &Notify) {
    while !missing_stores(dashboard).is_empty() {
        loaded.notified().await;
    }
}

async fn cmd_watch(
    config: &Config,
    client: DashboardClient,
    args: WatchArgs,
) -> Result<(), ExitError> {
    let dashboard = Dashboard::new();
    // Holds at most one pending wakeup no matter how many snapshots arrive.
    let loaded = Arc::new(Notify::new());
    let _subscriptions = watch_dashboard(&dashboard, config.json, &loaded);

    let opts = PollerOptions::from_config(config);
    let pollers = dashboard.spawn_pollers(&client, &opts);
    info!(
        api_base_url = client.base_url(),
        poll_interval_secs = config.poll_interval_secs,
        "watching dashboard"
    );

    if !args.once {
        let _ = tokio::signal::ctrl_c().await;
        pollers.abort();
        return Ok(());
    }

    // One full fetch round, with room for a slow request.
    let deadline = opts.interval + Duration::from_secs(config.request_timeout_secs);
    let all_loaded = tokio::time::timeout(deadline, wait_until_loaded(&dashboard, &loaded)).await;
    pollers.abort();

    if all_loaded.is_err() {
        return Err(ExitError::new(
            EXIT_API,
            format!(
                "api_error: not loaded within {deadline:?}: {}",
                missing_stores(&dashboard).join(", ")
            ),
        ));
    }
    Ok(())
}

fn print_snapshot<T: Serialize>(
    json: bool,
    store: &str,
    value: &T,
    text: impl FnOnce() -> String,
) {
    if json {
        match serde_json::to_string(&serde_json::json!({ "store": store, "value": value })) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(store, error = %err, "failed to serialize snapshot"),
        }
    } else {
        println!("{}", text());
    }
}

fn render_job_stats(stats: &JobStats) -> String {
    format!(
        "job_stats: enqueued={} processing={} scheduled={} succeeded={} failed={} deleted={} recurring_jobs={} servers={}",
        stats.enqueued,
        stats.processing,
        stats.scheduled,
        stats.succeeded,
        stats.failed,
        stats.deleted,
        stats.recurring_jobs,
        stats.background_job_servers
    )
}

fn render_servers(servers: &[ServerStatus]) -> String {
    let mut out = format!("servers: {}", servers.len());
    for server in servers {
        out.push_str(&format!(
            "\n  {} workers={} running={}",
            server.id, server.worker_pool_size, server.running
        ));
    }
    out
}

fn render_problems(problems: &[Problem]) -> String {
    if problems.is_empty() {
        return "problems: none".to_string();
    }
    let kinds: Vec<&str> = problems.iter().map(|p| p.kind.as_str()).collect();
    format!("problems: {}", kinds.join(", "))
}

async fn cmd_recurring_jobs_list(
    config: &Config,
    client: &DashboardClient,
) -> Result<(), ExitError> {
    let jobs = client
        .recurring_jobs()
        .await
        .map_err(|e| ExitError::api("list recurring jobs", e))?;
    if config.json {
        return print_json(&jobs);
    }
    print_recurring_jobs(&jobs);
    Ok(())
}

fn print_recurring_jobs(jobs: &[RecurringJob]) {
    if jobs.is_empty() {
        println!("no recurring jobs");
        return;
    }
    for job in jobs {
        let next_run = job
            .next_run
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "-".to_string());
        let state = if job.enabled { "enabled" } else { "disabled" };
        println!(
            "{}\t{}\t{} ({})\tnext={}\t{}",
            job.id, job.job_name, job.cron_expression, job.zone_id, next_run, state
        );
    }
}

#[derive(Serialize)]
struct BulkOutput<'a> {
    report: &'a BatchReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    recurring_jobs: Option<Vec<RecurringJob>>,
}

async fn cmd_bulk(
    config: &Config,
    client: DashboardClient,
    args: SelectionArgs,
    kind: ActionKind,
) -> Result<(), ExitError> {
    let ids = if args.all {
        client
            .recurring_jobs()
            .await
            .map_err(|e| ExitError::api("list recurring jobs", e))?
            .into_iter()
            .map(|job| job.id)
            .collect()
    } else {
        args.ids
    };

    let Some(selection) = Selection::new(ids) else {
        println!("no recurring jobs selected");
        return Ok(());
    };

    let coordinator = BulkActionCoordinator::new(Arc::new(client.clone()));
    let report = coordinator.execute(&selection, kind).await;

    let refreshed = if report.refresh {
        match client.recurring_jobs().await {
            Ok(jobs) => Some(jobs),
            Err(err) => {
                warn!(error = %err, "failed to refresh recurring jobs");
                None
            }
        }
    } else {
        None
    };

    if config.json {
        print_json(&BulkOutput {
            report: &report,
            recurring_jobs: refreshed,
        })?;
    } else {
        println!("{}", report.notification);
        if let Some(jobs) = &refreshed {
            print_recurring_jobs(jobs);
        }
    }

    if report.notification.is_error() {
        return Err(ExitError::new(
            EXIT_ACTION_FAILED,
            format!(
                "action_failed: {} of {} {} requests failed",
                report.counts.failed,
                report.counts.total(),
                kind.as_str()
            ),
        ));
    }
    Ok(())
}

async fn cmd_job_notice(
    config: &Config,
    client: &DashboardClient,
    args: NoticeArgs,
) -> Result<(), ExitError> {
    let (job, servers) = tokio::join!(client.job(args.id), client.servers());
    let job = job.map_err(|e| ExitError::api("fetch job", e))?;
    let servers = match servers {
        Ok(servers) => Snapshot::Loaded(Arc::new(servers)),
        Err(err) => {
            warn!(error = %err, "failed to fetch servers; retention notice unavailable");
            Snapshot::NotLoaded
        }
    };

    let notice = job_notice(&job, &servers, Utc::now());
    if config.json {
        return print_json(&notice);
    }
    match notice {
        Some(notice) => {
            println!("{}", notice.headline);
            if let Some(auto) = notice.auto_transition {
                println!("{auto}");
            }
        }
        None => match job.last_transition() {
            Some(last) => println!("This job is {:?}.", last.state),
            None => println!("This job has no state history."),
        },
    }
    Ok(())
}

async fn cmd_dismiss_severe(config: &Config, client: &DashboardClient) -> Result<(), ExitError> {
    let dashboard = Dashboard::new();
    let outcome = dismiss_severe_exception(client, &dashboard.problems).await;

    if config.json {
        print_json(&outcome)?;
    } else if outcome == DismissOutcome::Dismissed {
        println!("Dismissed severe exception report");
        if let Snapshot::Loaded(problems) = dashboard.problems.current() {
            println!("{}", render_problems(&problems));
        }
    }

    match outcome {
        DismissOutcome::Dismissed => Ok(()),
        DismissOutcome::Unacknowledged { status } => Err(ExitError::new(
            EXIT_API,
            format!("api_error: dismissal not acknowledged (status {status})"),
        )),
        DismissOutcome::Unreachable => Err(ExitError::new(
            EXIT_API,
            "api_error: dashboard unreachable",
        )),
    }
}

async fn cmd_copy_issue(
    config: &Config,
    client: &DashboardClient,
    args: CopyIssueArgs,
) -> Result<(), ExitError> {
    let problems = client
        .problems()
        .await
        .map_err(|e| ExitError::api("list problems", e))?;
    let Some(problem) = problems.iter().find(|p| p.is_severe_exception()) else {
        println!("no severe exception reported");
        return Ok(());
    };
    let body = problem.github_issue_body.as_deref().unwrap_or_default();

    let clipboard = args
        .clipboard_command
        .as_deref()
        .and_then(CommandClipboard::parse);
    let outcome = copy_issue_report(clipboard.as_ref().map(|c| c as &dyn Clipboard), body);

    match outcome {
        CopyOutcome::Copied(notification) => {
            if config.json {
                print_json(&notification)?;
            } else {
                println!("{notification}");
            }
        }
        CopyOutcome::ShowDialog { title, body } => {
            if config.json {
                print_json(&serde_json::json!({ "title": title, "body": body }))?;
            } else {
                println!("{title}");
                println!("{}", CopyOutcome::dialog_hint());
                println!();
                println!("{body}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn watch_once_waits_for_every_store() {
        let dashboard = Dashboard::new();
        let loaded = Arc::new(Notify::new());
        let _subscriptions = watch_dashboard(&dashboard, true, &loaded);

        dashboard.job_stats.push(JobStats::default());
        dashboard.servers.push(Vec::new());
        let early =
            tokio::time::timeout(Duration::from_millis(50), wait_until_loaded(&dashboard, &loaded))
                .await;
        assert!(early.is_err());
        assert_eq!(missing_stores(&dashboard), vec!["problems"]);

        dashboard.problems.push(Vec::new());
        tokio::time::timeout(Duration::from_secs(1), wait_until_loaded(&dashboard, &loaded))
            .await
            .unwrap();
        assert!(missing_stores(&dashboard).is_empty());
    }

    #[tokio::test]
    async fn repeated_snapshots_keep_a_single_wakeup() {
        let dashboard = Dashboard::new();
        let loaded = Arc::new(Notify::new());
        let _subscriptions = watch_dashboard(&dashboard, true, &loaded);

        for _ in 0..100 {
            dashboard.servers.push(Vec::new());
        }

        tokio::time::timeout(Duration::from_millis(50), loaded.notified())
            .await
            .unwrap();
        let backlog = tokio::time::timeout(Duration::from_millis(50), loaded.notified()).await;
        assert!(backlog.is_err());
    }

    #[test]
    fn watch_subscriptions_unsubscribe_on_drop() {
        let dashboard = Dashboard::new();
        let loaded = Arc::new(Notify::new());
        let subscriptions = watch_dashboard(&dashboard, true, &loaded);
        assert_eq!(dashboard.problems.observer_count(), 1);

        drop(subscriptions);
        assert_eq!(dashboard.job_stats.observer_count(), 0);
        assert_eq!(dashboard.servers.observer_count(), 0);
        assert_eq!(dashboard.problems.observer_count(), 0);
    }
}
