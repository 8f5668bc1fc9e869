//! End-to-end batch runs against a mock site
//!
//! The mock server plays the scanned site: same-site pages are probed over
//! HTTP while uploads are checked in a temporary directory.

use chrono::{Duration, TimeZone, Utc};
use linksweep::config::{parse_config, Config};
use linksweep::jobs::{JobQueue, ScanJob};
use linksweep::orchestrator::{LockPrimitive, StaticLoad, Trigger};
use linksweep::queue::{ContentItem, NextBatch};
use linksweep::scan::{BatchReport, BatchRunner, CandidateKind, RunOutcome, RunnerParts};
use linksweep::state::{LinkStatus, ScanState};
use linksweep::storage::{SqliteStorage, Storage};
use linksweep::SweepError;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration pointing the site at the mock server
fn create_test_config(site: &str, upload_dir: &Path, db_path: &Path, batch_size: u32) -> Config {
    parse_config(&format!(
        r#"
[site]
site-url = "{site}/"
upload-base-url = "{site}/wp-content/uploads/"
upload-base-dir = "{dir}"
allow-remote-fetch = true

[scan]
batch-size = {batch_size}
concurrency = 4
scan-method = "precise"

[http]
max-attempts = 2
initial-delay-ms = 10
remote-delay-ms = 0
timeout-secs = 5

[soft404]
min-length = 0

[storage]
database-path = "{db}"
"#,
        site = site,
        dir = upload_dir.display(),
        db = db_path.display(),
        batch_size = batch_size,
    ))
    .expect("Failed to parse test config")
}

fn item(id: i64, site: &str, body: &str) -> ContentItem {
    ContentItem {
        id,
        title: format!("Post {}", id),
        body_html: body.to_string(),
        modified_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        content_type: "post".to_string(),
        status: "publish".to_string(),
        permalink: Some(format!("{}/post-{}/", site, id)),
    }
}

struct Site {
    _dir: TempDir,
    storage: Arc<SqliteStorage>,
    runner: BatchRunner,
}

/// Builds a runner over a fresh database and upload directory
fn setup(mock_server: &MockServer, items: &[ContentItem], batch_size: u32) -> Site {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(uploads.join("2024")).unwrap();
    std::fs::write(uploads.join("2024").join("logo.png"), b"png").unwrap();

    let db_path = dir.path().join("linksweep.db");
    let config = create_test_config(&mock_server.uri(), &uploads, &db_path, batch_size);

    let storage = Arc::new(SqliteStorage::new(&db_path).expect("Failed to open database"));
    for item in items {
        storage.upsert_content_item(item).unwrap();
    }

    let mut parts = RunnerParts::sqlite(storage.clone(), &config.http);
    // The host's real load average must not defer test batches
    parts.load = Arc::new(StaticLoad(None));

    let runner = BatchRunner::from_parts(&config, parts).expect("Failed to build runner");

    Site {
        _dir: dir,
        storage,
        runner,
    }
}

async fn mount_site(mock_server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path("/about/"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("<html><head><title>About</title></head><body>Who we are</body></html>")
                .insert_header("content-type", "text/html"),
        )
        .mount(mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/moved/"))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", "text/html"))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/moved/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(
                    "<html><head><title>Page not found</title></head><body>Try searching</body></html>",
                )
                .insert_header("content-type", "text/html"),
        )
        .mount(mock_server)
        .await;

    // HEAD refused, GET works
    Mock::given(method("HEAD"))
        .and(path("/no-head/"))
        .respond_with(ResponseTemplate::new(405))
        .mount(mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/no-head/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<p>Plain page</p>"))
        .mount(mock_server)
        .await;

    Mock::given(method("HEAD"))
        .and(path("/gone/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(mock_server)
        .await;
}

fn expect_ran(outcome: RunOutcome) -> BatchReport {
    match outcome {
        RunOutcome::Ran(report) => report,
        other => panic!("Expected a batch run, got {:?}", other),
    }
}

#[tokio::test]
async fn test_full_scan_single_batch() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let site_url = mock_server.uri();

    let body = format!(
        r#"
        <p><img src="/wp-content/uploads/2024/logo.png"></p>
        <p><img src="{site}/wp-content/uploads/2024/missing.png"></p>
        <a href="/about/">About</a>
        <a href="/moved/">Moved</a>
        <a href="/no-head/">Old server</a>
        <a href="/gone/">Gone</a>
        <a href="http://10.0.0.1/admin">Router</a>
        <a href="mailto:editor@example.com">Mail</a>
        "#,
        site = site_url
    );
    let site = setup(&mock_server, &[item(1, &site_url, &body)], 10);

    let report = expect_ran(
        site.runner
            .run(Trigger::OnDemand, &ScanJob::new(0, false, Utc::now()))
            .await
            .expect("Batch failed"),
    );

    let statuses: Vec<(u32, LinkStatus)> = report
        .findings
        .iter()
        .map(|f| (f.occurrence_index, f.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (0, LinkStatus::Alive),
            (1, LinkStatus::MissingFile),
            (2, LinkStatus::Alive),
            (3, LinkStatus::Soft404),
            (4, LinkStatus::Alive),
            (5, LinkStatus::Broken),
            (6, LinkStatus::Rejected),
        ]
    );
    assert_eq!(report.findings[0].kind, CandidateKind::Image);
    assert_eq!(report.findings[5].http_status, Some(404));
    assert_eq!(report.next, NextBatch::Done);

    // Findings, status and checkpoint are persisted
    assert_eq!(site.storage.findings_for_item(1).unwrap().len(), 7);
    assert_eq!(
        site.storage.findings_by_status(LinkStatus::MissingFile).unwrap()[0]
            .reason
            .as_deref(),
        Some("2024/missing.png")
    );

    let status = site.storage.load_status().unwrap().expect("No status saved");
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.items_scanned, 1);
    assert_eq!(status.links_checked, 7);
    assert_eq!(status.broken_found, 3);
    assert!(site.storage.last_check().unwrap().is_some());

    // The lock is free again
    assert!(site.storage.current_lock().unwrap().is_none());
}

#[tokio::test]
async fn test_rescan_replaces_findings() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let site_url = mock_server.uri();

    let site = setup(
        &mock_server,
        &[item(1, &site_url, r#"<a href="/gone/">x</a><a href="/about/">y</a>"#)],
        10,
    );

    for _ in 0..2 {
        site.runner
            .run(Trigger::OnDemand, &ScanJob::new(0, true, Utc::now()))
            .await
            .unwrap();
    }

    assert_eq!(site.storage.findings_for_item(1).unwrap().len(), 2);
    let counts = site.storage.count_findings_by_status().unwrap();
    assert_eq!(counts.get(&LinkStatus::Broken), Some(&1));
    assert_eq!(counts.get(&LinkStatus::Alive), Some(&1));
}

#[tokio::test]
async fn test_batches_chain_through_the_job_table() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let site_url = mock_server.uri();

    let items = vec![
        item(1, &site_url, r#"<a href="/about/">a</a>"#),
        item(2, &site_url, r#"<a href="/gone/">b</a>"#),
    ];
    let site = setup(&mock_server, &items, 1);

    let first = expect_ran(
        site.runner
            .run(Trigger::Recurring, &ScanJob::new(0, true, Utc::now()))
            .await
            .unwrap(),
    );
    assert_eq!(first.items_scanned, 1);
    assert!(matches!(first.next, NextBatch::Scheduled(ref job) if job.batch_index == 1));
    assert_eq!(site.storage.last_check().unwrap(), None);
    assert_eq!(
        site.storage.load_status().unwrap().unwrap().state,
        ScanState::Waiting
    );

    let due = site
        .storage
        .claim_next_due_job(Utc::now() + Duration::hours(1))
        .unwrap()
        .expect("Next batch was not queued");

    let second = expect_ran(site.runner.run(Trigger::Recurring, &due).await.unwrap());
    assert_eq!(second.items_scanned, 1);
    assert_eq!(second.findings[0].item_id, 2);
    assert_eq!(second.next, NextBatch::Done);

    let status = site.storage.load_status().unwrap().unwrap();
    assert_eq!(status.state, ScanState::Completed);
    assert_eq!(status.items_scanned, 2);
    assert!(site.storage.last_check().unwrap().is_some());
    assert!(site.storage.pending_jobs().unwrap().is_empty());
}

#[tokio::test]
async fn test_on_demand_scan_rejected_while_locked() {
    let mock_server = MockServer::start().await;
    let site_url = mock_server.uri();
    let site = setup(&mock_server, &[item(1, &site_url, "<p>nothing</p>")], 10);

    let token = site.storage.acquire(300).expect("Lock should be free");

    let outcome = site
        .runner
        .run(Trigger::OnDemand, &ScanJob::new(0, true, Utc::now()))
        .await
        .unwrap();
    assert!(matches!(outcome, RunOutcome::Rejected(SweepError::AlreadyRunning)));

    // The rejected run must not steal or drop the lock
    let (held, _) = site.storage.current_lock().unwrap().expect("Lock vanished");
    assert_eq!(held, token);
}

#[tokio::test]
async fn test_tick_starts_a_delta_scan_and_chains_it() {
    let mock_server = MockServer::start().await;
    mount_site(&mock_server).await;
    let site_url = mock_server.uri();

    let items = vec![
        item(1, &site_url, r#"<a href="/about/">a</a>"#),
        item(2, &site_url, r#"<a href="/gone/">b</a>"#),
    ];
    let site = setup(&mock_server, &items, 1);

    let tick = site.runner.tick(site.storage.as_ref()).await.unwrap();
    assert!(tick.started_delta);
    assert!(tick.failed.is_empty());
    let first = match tick.outcomes.into_iter().next() {
        Some(RunOutcome::Ran(report)) => report,
        other => panic!("Expected a batch run, got {:?}", other),
    };
    assert!(!first.job.is_full_scan);
    assert!(!site.storage.load_status().unwrap().unwrap().is_full_scan);

    // The follow-up batch keeps the delta flag
    let pending = site.storage.pending_jobs().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].batch_index, 1);
    assert!(!pending[0].is_full_scan);
    assert!(site.storage.has_pending().unwrap());
}
