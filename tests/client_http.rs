use std::{sync::Arc, time::Duration};

use jobdash::{
    bulk::{ActionKind, ActionRequest, BatchResult, BulkActionCoordinator, Selection, TransportError},
    client::DashboardClient,
    dashboard::Dashboard,
    poller::PollerOptions,
    problems::{DismissOutcome, dismiss_severe_exception},
    retention::{RawRetention, RetentionPolicy},
    store::Snapshot,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> DashboardClient {
    DashboardClient::new(server.uri(), Duration::from_secs(5)).unwrap()
}

/// Address nobody listens on.
fn closed_port_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

fn servers_body() -> serde_json::Value {
    json!([{
        "id": "6b0f1b7e-64a4-4d2b-9d8e-0f1f1a0c5b11",
        "workerPoolSize": 8,
        "pollIntervalInSeconds": 15,
        "deleteSucceededJobsAfter": "PT36H",
        "permanentlyDeleteDeletedJobsAfter": 259200.0,
        "running": true
    }])
}

#[tokio::test]
async fn decodes_servers_with_mixed_retention_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(servers_body()))
        .mount(&server)
        .await;

    let servers = client(&server).servers().await.unwrap();
    assert_eq!(servers.len(), 1);
    assert_eq!(
        RetentionPolicy::parse(&servers[0].delete_succeeded_jobs_after).unwrap(),
        RetentionPolicy::from_seconds(36 * 3600)
    );
    assert_eq!(
        servers[0].permanently_delete_deleted_jobs_after,
        RawRetention::Seconds(259_200)
    );
}

#[tokio::test]
async fn reads_job_stats_from_the_event_stream() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse/jobstats"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(
                    "data: {\"total\":12,\"enqueued\":3,\"succeeded\":9,\"recurringJobs\":2,\"backgroundJobServers\":1}\n\n",
                ),
        )
        .mount(&server)
        .await;

    let stats = client(&server).job_stats().await.unwrap();
    assert_eq!(stats.total, 12);
    assert_eq!(stats.enqueued, 3);
    assert_eq!(stats.recurring_jobs, 2);
    assert_eq!(stats.background_job_servers, 1);
}

#[tokio::test]
async fn job_stats_stream_without_events_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse/jobstats"))
        .respond_with(ResponseTemplate::new(200).set_body_string(": keep-alive\n\n"))
        .mount(&server)
        .await;

    assert!(client(&server).job_stats().await.is_err());
}

#[tokio::test]
async fn bulk_delete_over_http_classifies_each_status() {
    let server = MockServer::start().await;
    for (id, status) in [("a", 204), ("b", 204), ("c", 409)] {
        Mock::given(method("DELETE"))
            .and(path(format!("/api/recurring-jobs/{id}")))
            .respond_with(ResponseTemplate::new(status))
            .expect(1)
            .mount(&server)
            .await;
    }

    let coordinator = BulkActionCoordinator::new(Arc::new(client(&server)));
    let selection = Selection::new(["a", "b", "c"]).unwrap();
    let report = coordinator.execute(&selection, ActionKind::Delete).await;

    assert_eq!(report.result, BatchResult::SomeSucceededSomeRejected);
    assert_eq!(
        report.notification.message,
        "Successfully deleted recurring jobs. Some of the selected jobs cannot be deleted"
    );
    assert!(report.refresh);
}

#[tokio::test]
async fn bulk_trigger_posts_to_the_trigger_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/recurring-jobs/import-sales/trigger"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let coordinator = BulkActionCoordinator::new(Arc::new(client(&server)));
    let selection = Selection::new(["import-sales"]).unwrap();
    let report = coordinator.execute(&selection, ActionKind::Trigger).await;

    assert!(matches!(report.result, BatchResult::SomeFailed(_)));
    assert!(report.notification.is_error());
    assert!(!report.refresh);
}

#[tokio::test]
async fn slow_responses_surface_as_timeouts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/recurring-jobs/slow/enable"))
        .respond_with(ResponseTemplate::new(204).set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let client = DashboardClient::new(server.uri(), Duration::from_millis(200)).unwrap();
    let res = client
        .send_action(&ActionRequest {
            resource_id: "slow".to_string(),
            kind: ActionKind::Enable,
        })
        .await;
    assert_eq!(res, Err(TransportError::Timeout));
}

#[tokio::test]
async fn dismissing_the_severe_exception_refreshes_problems() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/problems/severe-jobrunr-exception"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/problems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let dashboard = Dashboard::new();
    let outcome = dismiss_severe_exception(&client(&server), &dashboard.problems).await;

    assert_eq!(outcome, DismissOutcome::Dismissed);
    let problems = dashboard.problems.current();
    assert_eq!(problems.loaded().map(|p| p.len()), Some(0));
}

#[tokio::test]
async fn unacknowledged_dismissal_still_refreshes() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/api/problems/severe-jobrunr-exception"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/problems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "type": "severe-jobrunr-exception", "githubIssueBody": "body" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let dashboard = Dashboard::new();
    let outcome = dismiss_severe_exception(&client(&server), &dashboard.problems).await;

    assert_eq!(outcome, DismissOutcome::Unacknowledged { status: 500 });
    assert!(dashboard.problems.current().is_loaded());
}

#[tokio::test]
async fn unreachable_dismissal_does_not_refresh() {
    let client = DashboardClient::new(closed_port_url(), Duration::from_secs(2)).unwrap();
    let dashboard = Dashboard::new();
    let outcome = dismiss_severe_exception(&client, &dashboard.problems).await;

    assert_eq!(outcome, DismissOutcome::Unreachable);
    assert_eq!(dashboard.problems.current(), Snapshot::NotLoaded);
}

#[tokio::test]
async fn pollers_fill_every_dashboard_store() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/sse/jobstats"))
        .respond_with(ResponseTemplate::new(200).set_body_string("data: {\"total\":1}\n\n"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/servers"))
        .respond_with(ResponseTemplate::new(200).set_body_json(servers_body()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/problems"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let dashboard = Dashboard::new();
    let opts = PollerOptions {
        interval: Duration::from_millis(50),
        failure_log_throttle: Duration::from_secs(60),
    };
    let pollers = dashboard.spawn_pollers(&client(&server), &opts);

    tokio::time::timeout(Duration::from_secs(5), async {
        while !(dashboard.job_stats.current().is_loaded()
            && dashboard.servers.current().is_loaded()
            && dashboard.problems.current().is_loaded())
        {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    pollers.abort();

    let stats = dashboard.job_stats.current();
    assert_eq!(stats.loaded().map(|s| s.total), Some(1));
}
