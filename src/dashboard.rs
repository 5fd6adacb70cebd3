use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::{
    client::{DashboardClient, JobStatsSource, ProblemsSource, ServersSource},
    domain::{JobStats, Problem, ServerStatus},
    poller::{PollerOptions, spawn_snapshot_poller},
    store::StateStore,
};

/// Owns one store per mirrored resource. Consumers get the stores injected instead of reaching
/// for process-wide state.
#[derive(Debug, Clone)]
pub struct Dashboard {
    pub job_stats: Arc<StateStore<JobStats>>,
    pub servers: Arc<StateStore<Vec<ServerStatus>>>,
    pub problems: Arc<StateStore<Vec<Problem>>>,
}

pub struct PollerHandles {
    handles: Vec<JoinHandle<()>>,
}

impl PollerHandles {
    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for PollerHandles {
    fn drop(&mut self) {
        self.abort();
    }
}

impl Default for Dashboard {
    fn default() -> Self {
        Self::new()
    }
}

impl Dashboard {
    pub fn new() -> Self {
        Self {
            job_stats: Arc::new(StateStore::new("job_stats")),
            servers: Arc::new(StateStore::new("servers")),
            problems: Arc::new(StateStore::new("problems")),
        }
    }

    /// Starts one poller per store. Pollers stop when the returned handles are dropped.
    pub fn spawn_pollers(&self, client: &DashboardClient, opts: &PollerOptions) -> PollerHandles {
        let handles = vec![
            spawn_snapshot_poller::<JobStats>(
                opts.clone(),
                Arc::new(JobStatsSource(client.clone())),
                self.job_stats.clone(),
            ),
            spawn_snapshot_poller::<Vec<ServerStatus>>(
                opts.clone(),
                Arc::new(ServersSource(client.clone())),
                self.servers.clone(),
            ),
            spawn_snapshot_poller::<Vec<Problem>>(
                opts.clone(),
                Arc::new(ProblemsSource(client.clone())),
                self.problems.clone(),
            ),
        ];
        PollerHandles { handles }
    }

    /// Drops every snapshot and observer.
    pub fn reset(&self) {
        self.job_stats.reset();
        self.servers.reset();
        self.problems.reset();
    }
}
