use std::{collections::BTreeSet, future::Future, pin::Pin, sync::Arc};

use futures_util::future::join_all;
use serde::Serialize;
use tracing::{info, warn};

use crate::notification::{Notification, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Delete,
    Trigger,
    Enable,
    Disable,
}

impl ActionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Delete => "delete",
            Self::Trigger => "trigger",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }

    /// Notification kind, in the past tense the UI uses.
    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Delete => "deleted",
            Self::Trigger => "triggered",
            Self::Enable => "enabled",
            Self::Disable => "disabled",
        }
    }

    fn progressive(self) -> &'static str {
        match self {
            Self::Delete => "deleting",
            Self::Trigger => "triggering",
            Self::Enable => "enabling",
            Self::Disable => "disabling",
        }
    }

    /// Maps a response status to an outcome. Only delete has a business-level rejection
    /// (409: the recurring job is not deletable from the dashboard).
    pub fn classify(self, status: u16) -> ActionOutcome {
        match (self, status) {
            (_, 204) => ActionOutcome::Succeeded,
            (Self::Delete, 409) => ActionOutcome::Rejected,
            _ => ActionOutcome::Failed,
        }
    }

    pub fn summary(self, result: &BatchResult) -> Notification {
        let kind = self.past_tense();
        match result {
            BatchResult::SomeFailed(_) => Notification::error(
                kind,
                format!(
                    "Error {} recurring jobs - please refresh the page",
                    self.progressive()
                ),
            ),
            BatchResult::AllSucceeded => {
                Notification::success(kind, format!("Successfully {kind} recurring jobs"))
            }
            BatchResult::SomeSucceededSomeRejected => Notification::success(
                kind,
                format!(
                    "Successfully {kind} recurring jobs. Some of the selected jobs cannot be {kind}"
                ),
            ),
            BatchResult::AllRejected => {
                Notification::success(kind, format!("All selected jobs cannot be {kind}"))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub resource_id: String,
    pub kind: ActionKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Timeout,
    Request { message: String },
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timed out"),
            Self::Request { message } => write!(f, "http request failed: {message}"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<u16, TransportError>> + Send>>;

/// Issues one action against one resource and resolves to the raw response status.
pub trait ActionTransport: Send + Sync {
    fn send(&self, request: ActionRequest) -> ActionFuture;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Succeeded,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OutcomeCounts {
    pub succeeded: usize,
    pub rejected: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: ActionOutcome) {
        match outcome {
            ActionOutcome::Succeeded => self.succeeded += 1,
            ActionOutcome::Rejected => self.rejected += 1,
            ActionOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.rejected + self.failed
    }
}

impl FromIterator<ActionOutcome> for OutcomeCounts {
    fn from_iter<I: IntoIterator<Item = ActionOutcome>>(iter: I) -> Self {
        let mut counts = Self::default();
        for outcome in iter {
            counts.record(outcome);
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureSummary {
    pub failed: usize,
    pub total: usize,
    /// First failure observed, for logs; the UI does not show which resources failed.
    pub first_error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchResult {
    AllSucceeded,
    SomeSucceededSomeRejected,
    AllRejected,
    SomeFailed(FailureSummary),
}

impl BatchResult {
    /// `Failed` dominates `Rejected`, which dominates `Succeeded`.
    pub fn aggregate(counts: &OutcomeCounts, first_error: Option<String>) -> Self {
        if counts.failed > 0 {
            return Self::SomeFailed(FailureSummary {
                failed: counts.failed,
                total: counts.total(),
                first_error: first_error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        match (counts.succeeded, counts.rejected) {
            (_, 0) => Self::AllSucceeded,
            (0, _) => Self::AllRejected,
            _ => Self::SomeSucceededSomeRejected,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::SomeFailed(_) => Severity::Error,
            _ => Severity::Success,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllSucceeded => "all_succeeded",
            Self::SomeSucceededSomeRejected => "some_succeeded_some_rejected",
            Self::AllRejected => "all_rejected",
            Self::SomeFailed(_) => "some_failed",
        }
    }
}

/// Non-empty, de-duplicated set of selected resource ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    /// Returns `None` for an empty selection; there is nothing to act on.
    pub fn new<I, S>(ids: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: BTreeSet<String> = ids.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return None;
        }
        Some(Self { ids })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub kind: ActionKind,
    pub result: BatchResult,
    pub counts: OutcomeCounts,
    pub notification: Notification,
    /// Whether the selected list changed server-side and should be re-fetched.
    pub refresh: bool,
}

#[derive(Clone)]
pub struct BulkActionCoordinator {
    transport: Arc<dyn ActionTransport>,
}

impl BulkActionCoordinator {
    pub fn new(transport: Arc<dyn ActionTransport>) -> Self {
        Self { transport }
    }

    /// Sends one request per selected resource, waits for all of them to settle and reports
    /// the aggregate. Never short-circuits and never fails.
    pub async fn execute(&self, selection: &Selection, kind: ActionKind) -> BatchReport {
        let requests = selection.iter().map(|id| {
            self.transport.send(ActionRequest {
                resource_id: id.to_string(),
                kind,
            })
        });
        let settled = join_all(requests).await;

        let mut counts = OutcomeCounts::default();
        let mut first_error: Option<String> = None;
        for (resource_id, res) in selection.iter().zip(settled) {
            let outcome = match res {
                Ok(status) => {
                    let outcome = kind.classify(status);
                    if outcome == ActionOutcome::Failed {
                        warn!(
                            action = kind.as_str(),
                            resource_id, status, "unexpected status for recurring job action"
                        );
                        first_error.get_or_insert_with(|| format!("unexpected status {status}"));
                    }
                    outcome
                }
                Err(err) => {
                    warn!(
                        action = kind.as_str(),
                        resource_id,
                        error = %err,
                        "recurring job action request failed"
                    );
                    first_error.get_or_insert_with(|| err.to_string());
                    ActionOutcome::Failed
                }
            };
            counts.record(outcome);
        }

        let result = BatchResult::aggregate(&counts, first_error);
        let notification = kind.summary(&result);
        let refresh = counts.succeeded > 0;

        info!(
            action = kind.as_str(),
            result = result.as_str(),
            succeeded = counts.succeeded,
            rejected = counts.rejected,
            failed = counts.failed,
            refresh,
            "bulk action settled"
        );

        BatchReport {
            kind,
            result,
            counts,
            notification,
            refresh,
        }
    }
}
