use std::{
    io::Write,
    process::{Command, Stdio},
};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    client::DashboardClient,
    domain::{Problem, SEVERE_EXCEPTION_PROBLEM},
    notification::Notification,
    store::StateStore,
};

pub const COPY_FAILED_TITLE: &str = "Could not copy issue data to clipboard";
const COPY_FAILED_HINT: &str =
    "Please copy the data below and paste it in the Github issue as is.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DismissOutcome {
    Dismissed,
    Unacknowledged { status: u16 },
    Unreachable,
}

/// Acknowledges the severe-exception report, then re-fetches the problem list into `problems`.
///
/// Failures are logged and folded into the outcome; the caller only decides how to render it.
pub async fn dismiss_severe_exception(
    client: &DashboardClient,
    problems: &StateStore<Vec<Problem>>,
) -> DismissOutcome {
    let outcome = match client.dismiss_problem(SEVERE_EXCEPTION_PROBLEM).await {
        Ok(status) if (200..300).contains(&status) => DismissOutcome::Dismissed,
        Ok(status) => {
            warn!(status, "severe exception dismissal was not acknowledged");
            DismissOutcome::Unacknowledged { status }
        }
        Err(err) => {
            warn!(error = %err, "failed to dismiss severe exception");
            return DismissOutcome::Unreachable;
        }
    };

    match client.problems().await {
        Ok(list) => {
            info!(problems = list.len(), "problems refreshed");
            problems.push(list);
        }
        Err(err) => warn!(error = %err, "failed to refresh problems"),
    }
    outcome
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClipboardError {
    pub message: String,
}

impl std::fmt::Display for ClipboardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "clipboard write failed: {}", self.message)
    }
}

impl std::error::Error for ClipboardError {}

pub trait Clipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Pipes text into an external clipboard tool such as `wl-copy`, `xclip -selection clipboard`
/// or `pbcopy`.
#[derive(Debug, Clone)]
pub struct CommandClipboard {
    program: String,
    args: Vec<String>,
}

impl CommandClipboard {
    /// Splits a command line on whitespace; returns `None` for a blank command.
    pub fn parse(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }
}

impl Clipboard for CommandClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        let err = |message: String| ClipboardError { message };
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| err(format!("spawn {}: {e}", self.program)))?;
        let written = match child.stdin.take() {
            Some(mut stdin) => stdin.write_all(text.as_bytes()),
            None => Ok(()),
        };
        if let Err(e) = written {
            // Reap the tool before reporting.
            let _ = child.kill();
            let _ = child.wait();
            return Err(err(format!("write stdin: {e}")));
        }
        let status = child
            .wait()
            .map_err(|e| err(format!("wait {}: {e}", self.program)))?;
        if !status.success() {
            return Err(err(format!("{} exited with {status}", self.program)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyOutcome {
    Copied(Notification),
    /// Show the body in a dialog so the user can copy it by hand.
    ShowDialog { title: &'static str, body: String },
}

impl CopyOutcome {
    pub fn dialog_hint() -> &'static str {
        COPY_FAILED_HINT
    }
}

pub fn copy_issue_report(clipboard: Option<&dyn Clipboard>, body: &str) -> CopyOutcome {
    let dialog = || CopyOutcome::ShowDialog {
        title: COPY_FAILED_TITLE,
        body: body.to_string(),
    };
    let Some(clipboard) = clipboard else {
        return dialog();
    };
    match clipboard.write_text(body) {
        Ok(()) => CopyOutcome::Copied(Notification::success(
            "copied",
            "Successfully copied issue data to the clipboard",
        )),
        Err(err) => {
            warn!(error = %err, "falling back to issue dialog");
            dialog()
        }
    }
}
