use std::time::Duration;

use reqwest::header::ACCEPT;
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    bulk::{ActionFuture, ActionKind, ActionRequest, ActionTransport, TransportError},
    config::Config,
    domain::{Job, JobStats, Problem, RecurringJob, ServerStatus},
    poller::{FetchFuture, SnapshotSource},
};

/// HTTP client for the dashboard REST API.
#[derive(Debug, Clone)]
pub struct DashboardClient {
    base: String,
    client: reqwest::Client,
}

impl DashboardClient {
    pub fn new(base: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("jobdash/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            base: base.into(),
            client,
        })
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Self::new(
            config.api_base_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.trim_end_matches('/'))
    }

    pub async fn recurring_jobs(&self) -> anyhow::Result<Vec<RecurringJob>> {
        let resp = self
            .client
            .get(self.url("/api/recurring-jobs"))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json::<RecurringJobsResponse>().await?.into_items())
    }

    pub async fn servers(&self) -> anyhow::Result<Vec<ServerStatus>> {
        let resp = self
            .client
            .get(self.url("/api/servers"))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn problems(&self) -> anyhow::Result<Vec<Problem>> {
        let resp = self
            .client
            .get(self.url("/api/problems"))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    pub async fn job(&self, id: Uuid) -> anyhow::Result<Job> {
        let resp = self
            .client
            .get(self.url(&format!("/api/jobs/{id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(resp.json().await?)
    }

    /// Reads the first frame of the job stats event stream.
    pub async fn job_stats(&self) -> anyhow::Result<JobStats> {
        let mut resp = self
            .client
            .get(self.url("/sse/jobstats"))
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?
            .error_for_status()?;

        let mut buf: Vec<u8> = Vec::new();
        while let Some(chunk) = resp.chunk().await? {
            buf.extend_from_slice(&chunk);
            if let Some(data) = first_event_data(&String::from_utf8_lossy(&buf)) {
                return Ok(serde_json::from_str(&data)?);
            }
        }
        anyhow::bail!("job stats stream closed before the first event")
    }

    /// Deletes a problem report by type. Returns the raw response status.
    pub async fn dismiss_problem(&self, kind: &str) -> Result<u16, TransportError> {
        self.client
            .delete(self.url(&format!("/api/problems/{kind}")))
            .send()
            .await
            .map(|resp| resp.status().as_u16())
            .map_err(transport_error)
    }

    pub async fn send_action(&self, request: &ActionRequest) -> Result<u16, TransportError> {
        let id = &request.resource_id;
        let builder = match request.kind {
            ActionKind::Delete => self
                .client
                .delete(self.url(&format!("/api/recurring-jobs/{id}"))),
            kind => self.client.post(self.url(&format!(
                "/api/recurring-jobs/{id}/{}",
                kind.as_str()
            ))),
        };
        builder
            .send()
            .await
            .map(|resp| resp.status().as_u16())
            .map_err(transport_error)
    }
}

fn transport_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request {
            message: err.to_string(),
        }
    }
}

/// Older servers return a bare list, newer ones a page.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RecurringJobsResponse {
    List(Vec<RecurringJob>),
    Page { items: Vec<RecurringJob> },
}

impl RecurringJobsResponse {
    fn into_items(self) -> Vec<RecurringJob> {
        match self {
            Self::List(items) | Self::Page { items } => items,
        }
    }
}

/// Returns the `data` payload of the first complete event in `stream`, if any.
fn first_event_data(stream: &str) -> Option<String> {
    let normalized = stream.replace("\r\n", "\n");
    let mut events: Vec<&str> = normalized.split("\n\n").collect();
    // The tail is still being received.
    events.pop();
    events.into_iter().find_map(|event| {
        let data: Vec<&str> = event
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|value| value.strip_prefix(' ').unwrap_or(value))
            .collect();
        (!data.is_empty()).then(|| data.join("\n"))
    })
}

impl ActionTransport for DashboardClient {
    fn send(&self, request: ActionRequest) -> ActionFuture {
        let client = self.clone();
        Box::pin(async move { client.send_action(&request).await })
    }
}

pub struct JobStatsSource(pub DashboardClient);

impl SnapshotSource<JobStats> for JobStatsSource {
    fn fetch(&self) -> FetchFuture<JobStats> {
        let client = self.0.clone();
        Box::pin(async move { client.job_stats().await })
    }

    fn name(&self) -> &'static str {
        "job_stats"
    }
}

pub struct ServersSource(pub DashboardClient);

impl SnapshotSource<Vec<ServerStatus>> for ServersSource {
    fn fetch(&self) -> FetchFuture<Vec<ServerStatus>> {
        let client = self.0.clone();
        Box::pin(async move { client.servers().await })
    }

    fn name(&self) -> &'static str {
        "servers"
    }
}

pub struct ProblemsSource(pub DashboardClient);

impl SnapshotSource<Vec<Problem>> for ProblemsSource {
    fn fetch(&self) -> FetchFuture<Vec<Problem>> {
        let client = self.0.clone();
        Box::pin(async move { client.problems().await })
    }

    fn name(&self) -> &'static str {
        "problems"
    }
}
