use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::{
    domain::{Job, JobStateName, ServerStatus},
    retention::{Countdown, RawRetention, RetentionPolicy},
    store::Snapshot,
};

/// Job states that the server cleans up on its own after a retention period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Succeeded,
    Failed,
    Deleted,
}

impl TerminalState {
    pub fn from_state(state: JobStateName) -> Option<Self> {
        match state {
            JobStateName::Succeeded => Some(Self::Succeeded),
            JobStateName::Failed => Some(Self::Failed),
            JobStateName::Deleted => Some(Self::Deleted),
            _ => None,
        }
    }

    pub fn headline(self) -> &'static str {
        match self {
            Self::Succeeded => "This job has succeeded.",
            Self::Failed => "This job has failed.",
            Self::Deleted => "This job is deleted.",
        }
    }

    fn message(self) -> &'static str {
        match self {
            Self::Succeeded => "It will automatically go to the deleted state",
            Self::Failed | Self::Deleted => "It will automatically be removed",
        }
    }

    fn retention(self, server: &ServerStatus) -> Option<&RawRetention> {
        match self {
            Self::Succeeded => Some(&server.delete_succeeded_jobs_after),
            Self::Failed => server.delete_failed_jobs_after.as_ref(),
            Self::Deleted => Some(&server.permanently_delete_deleted_jobs_after),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoTransitionNotice {
    pub message: &'static str,
    pub at: DateTime<Utc>,
    pub countdown: Countdown,
}

impl std::fmt::Display for AutoTransitionNotice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.countdown {
            Countdown::Pending { remaining } => {
                write!(f, "{} in {}", self.message, humanize(remaining))
            }
            Countdown::Reached { ago } => {
                write!(f, "{} (due {} ago)", self.message, humanize(ago))
            }
        }
    }
}

/// Derives the "It will automatically …" notice for a job in `state`.
///
/// Retention settings come from the first server in the snapshot; all servers of a cluster
/// share them. Returns `None` until servers are loaded, for non-terminal states, when the
/// policy is disabled and when the configured value cannot be parsed.
pub fn auto_transition_notice(
    state: JobStateName,
    last_transition: DateTime<Utc>,
    servers: &Snapshot<Vec<ServerStatus>>,
    now: DateTime<Utc>,
) -> Option<AutoTransitionNotice> {
    let terminal = TerminalState::from_state(state)?;
    let server = servers.loaded()?.first()?;
    let raw = terminal.retention(server)?;

    let policy = match RetentionPolicy::parse(raw) {
        Ok(policy) => policy,
        Err(err) => {
            warn!(
                server_id = %server.id,
                state = ?state,
                error = %err,
                "ignoring unparseable retention setting"
            );
            return None;
        }
    };
    if policy.is_disabled() {
        debug!(server_id = %server.id, state = ?state, "automatic transition disabled");
        return None;
    }

    let at = policy.transition_instant(last_transition)?;
    Some(AutoTransitionNotice {
        message: terminal.message(),
        at,
        countdown: Countdown::between(at, now),
    })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobNotice {
    pub headline: &'static str,
    pub auto_transition: Option<String>,
    pub transition_at: Option<DateTime<Utc>>,
}

/// Notice block shown on a job's detail view, or `None` while the job is still in flight.
pub fn job_notice(
    job: &Job,
    servers: &Snapshot<Vec<ServerStatus>>,
    now: DateTime<Utc>,
) -> Option<JobNotice> {
    let last = job.last_transition()?;
    let terminal = TerminalState::from_state(last.state)?;
    let auto = auto_transition_notice(last.state, last.created_at, servers, now);
    Some(JobNotice {
        headline: terminal.headline(),
        auto_transition: auto.as_ref().map(ToString::to_string),
        transition_at: auto.map(|n| n.at),
    })
}

/// Two most significant units, e.g. `1d 4h` or `30m`.
pub fn humanize(duration: Duration) -> String {
    let total = duration.num_seconds().max(0);
    let units = [
        (total / 86_400, "d"),
        (total % 86_400 / 3_600, "h"),
        (total % 3_600 / 60, "m"),
        (total % 60, "s"),
    ];
    let parts: Vec<String> = units
        .iter()
        .skip_while(|(value, _)| *value == 0)
        .take(2)
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect();
    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobHistoryEntry;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use uuid::Uuid;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    fn server(succeeded: RawRetention, failed: Option<RawRetention>) -> ServerStatus {
        ServerStatus {
            id: Uuid::nil(),
            worker_pool_size: 4,
            poll_interval_in_seconds: 15,
            delete_succeeded_jobs_after: succeeded,
            delete_failed_jobs_after: failed,
            permanently_delete_deleted_jobs_after: RawRetention::Seconds(72 * 3600),
            first_heartbeat: None,
            last_heartbeat: None,
            running: true,
            system_total_memory: None,
            system_free_memory: None,
            system_cpu_load: None,
            process_max_memory: None,
            process_free_memory: None,
            process_allocated_memory: None,
            process_cpu_load: None,
        }
    }

    fn loaded(servers: Vec<ServerStatus>) -> Snapshot<Vec<ServerStatus>> {
        Snapshot::Loaded(Arc::new(servers))
    }

    #[test]
    fn succeeded_job_half_way_through_retention_is_pending() {
        let servers = loaded(vec![server(RawRetention::from("PT1H"), None)]);
        let notice = auto_transition_notice(
            JobStateName::Succeeded,
            t0(),
            &servers,
            t0() + Duration::minutes(30),
        )
        .unwrap();

        assert_eq!(
            notice,
            AutoTransitionNotice {
                message: "It will automatically go to the deleted state",
                at: t0() + Duration::hours(1),
                countdown: Countdown::Pending {
                    remaining: Duration::minutes(30)
                },
            }
        );
        assert_eq!(
            notice.to_string(),
            "It will automatically go to the deleted state in 30m"
        );
    }

    #[test]
    fn zero_retention_suppresses_the_notice() {
        let servers = loaded(vec![server(RawRetention::Seconds(0), None)]);
        assert_eq!(
            auto_transition_notice(JobStateName::Succeeded, t0(), &servers, t0()),
            None
        );
    }

    #[test]
    fn malformed_retention_suppresses_the_notice() {
        let servers = loaded(vec![server(RawRetention::from("every now and then"), None)]);
        assert_eq!(
            auto_transition_notice(JobStateName::Succeeded, t0(), &servers, t0()),
            None
        );
    }

    #[test]
    fn not_loaded_or_empty_servers_suppress_the_notice() {
        assert_eq!(
            auto_transition_notice(JobStateName::Deleted, t0(), &Snapshot::NotLoaded, t0()),
            None
        );
        assert_eq!(
            auto_transition_notice(JobStateName::Deleted, t0(), &loaded(vec![]), t0()),
            None
        );
    }

    #[test]
    fn failed_jobs_use_the_failed_retention_when_reported() {
        let without = loaded(vec![server(RawRetention::Seconds(60), None)]);
        assert_eq!(
            auto_transition_notice(JobStateName::Failed, t0(), &without, t0()),
            None
        );

        let with = loaded(vec![server(
            RawRetention::Seconds(60),
            Some(RawRetention::from("P1D")),
        )]);
        let notice = auto_transition_notice(JobStateName::Failed, t0(), &with, t0()).unwrap();
        assert_eq!(notice.message, "It will automatically be removed");
        assert_eq!(notice.at, t0() + Duration::days(1));
    }

    #[test]
    fn only_the_first_server_is_consulted() {
        let servers = loaded(vec![
            server(RawRetention::Seconds(0), None),
            server(RawRetention::from("PT1H"), None),
        ]);
        assert_eq!(
            auto_transition_notice(JobStateName::Succeeded, t0(), &servers, t0()),
            None
        );
    }

    #[test]
    fn non_terminal_states_have_no_notice() {
        let servers = loaded(vec![server(RawRetention::from("PT1H"), None)]);
        assert_eq!(
            auto_transition_notice(JobStateName::Processing, t0(), &servers, t0()),
            None
        );
    }

    #[test]
    fn job_notice_uses_the_last_transition() {
        let servers = loaded(vec![server(RawRetention::Seconds(3600), None)]);
        let job = Job {
            id: Uuid::nil(),
            job_name: Some("send mail".to_string()),
            job_history: vec![
                JobHistoryEntry {
                    state: JobStateName::Processing,
                    created_at: t0() - Duration::minutes(1),
                },
                JobHistoryEntry {
                    state: JobStateName::Deleted,
                    created_at: t0(),
                },
            ],
        };
        let notice = job_notice(&job, &servers, t0() + Duration::hours(80)).unwrap();
        assert_eq!(notice.headline, "This job is deleted.");
        assert_eq!(
            notice.auto_transition.as_deref(),
            Some("It will automatically be removed (due 8h ago)")
        );
    }

    #[test]
    fn humanize_keeps_two_units() {
        assert_eq!(humanize(Duration::seconds(0)), "0s");
        assert_eq!(humanize(Duration::seconds(90)), "1m 30s");
        assert_eq!(humanize(Duration::hours(36)), "1d 12h");
        assert_eq!(humanize(Duration::days(1) + Duration::seconds(5)), "1d");
    }
}
