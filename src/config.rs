use clap::{Args, Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "jobdash",
    about = "Command-line client for the JobRunr dashboard API",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Mirror job stats, servers and problems, printing every change.
    Watch(WatchArgs),

    /// List recurring jobs or act on a selection of them.
    #[command(subcommand)]
    RecurringJobs(RecurringJobsCommand),

    #[command(subcommand)]
    Jobs(JobsCommand),

    /// Inspect or acknowledge problems reported by the background job servers.
    #[command(subcommand)]
    Problems(ProblemsCommand),
}

#[derive(Args, Debug, Clone)]
pub struct WatchArgs {
    /// Exit after every resource has been loaded once.
    #[arg(long)]
    pub once: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum RecurringJobsCommand {
    List,
    Delete(SelectionArgs),
    Trigger(SelectionArgs),
    Enable(SelectionArgs),
    Disable(SelectionArgs),
}

#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    /// Recurring job ids to act on.
    #[arg(value_name = "ID", required_unless_present = "all", conflicts_with = "all")]
    pub ids: Vec<String>,

    /// Select every recurring job currently known to the dashboard.
    #[arg(long)]
    pub all: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum JobsCommand {
    /// Show the state notice of a job, including when it will be cleaned up automatically.
    Notice(NoticeArgs),
}

#[derive(Args, Debug, Clone)]
pub struct NoticeArgs {
    #[arg(value_name = "JOB_ID")]
    pub id: Uuid,
}

#[derive(Subcommand, Debug, Clone)]
pub enum ProblemsCommand {
    /// Dismiss the severe exception report.
    DismissSevere,

    /// Copy the severe exception report's issue body to the clipboard.
    CopyIssue(CopyIssueArgs),
}

#[derive(Args, Debug, Clone)]
pub struct CopyIssueArgs {
    /// Command that reads the clipboard contents from stdin (e.g. `wl-copy`, `pbcopy`).
    #[arg(long, env = "JOBDASH_CLIPBOARD_COMMAND", value_name = "CMD")]
    pub clipboard_command: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "JOBDASH_API_BASE_URL",
        value_name = "URL",
        default_value = "http://127.0.0.1:8000"
    )]
    pub api_base_url: String,

    #[arg(
        long = "poll-interval-secs",
        global = true,
        env = "JOBDASH_POLL_INTERVAL_SECS",
        value_name = "SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=300)
    )]
    pub poll_interval_secs: u64,

    #[arg(
        long = "request-timeout-secs",
        global = true,
        env = "JOBDASH_REQUEST_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 10,
        value_parser = clap::value_parser!(u64).range(1..=120)
    )]
    pub request_timeout_secs: u64,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true)]
    pub json: bool,
}
