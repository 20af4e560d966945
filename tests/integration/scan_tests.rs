//! Integration tests for the scan engine
//!
//! These tests use wiremock to stand up targets and run whole scans against
//! them, checking what ends up in the store.

use std::sync::Arc;
use std::time::Duration;
use sumi_probe::config::{EngineConfig, ScanConfiguration};
use sumi_probe::crawler::RetryPolicy;
use sumi_probe::fingerprint::SignatureTable;
use sumi_probe::storage::{ScanJob, ScanStore, SqliteStore};
use sumi_probe::{
    normalize_url, Orchestrator, PageOutcome, ScanContext, ScanError, ScanReport, ScanStatus,
};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn scan_config(max_depth: u32, max_pages: u32) -> ScanConfiguration {
    ScanConfiguration {
        max_depth,
        max_pages,
        requests_per_second: 50.0,
        timeout: 2.0,
        follow_redirects: true,
        respect_robots: true,
        user_agent: "SumiProbe/1.0".to_string(),
    }
}

fn engine_config() -> EngineConfig {
    EngineConfig {
        cancel_grace: 1,
        throttle_penalty: 1,
        robots_timeout: 2,
        ..EngineConfig::default()
    }
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/html; charset=utf-8")
        .set_body_string(format!("<html><body>{}</body></html>", body))
}

struct Harness {
    store: Arc<SqliteStore>,
    orchestrator: Orchestrator,
}

impl Harness {
    fn new(retry: RetryPolicy) -> Self {
        Self::with_engine(engine_config(), retry)
    }

    fn with_engine(engine: EngineConfig, retry: RetryPolicy) -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().expect("store"));
        let context = ScanContext::new(
            engine,
            retry,
            SignatureTable::builtin().expect("signatures"),
        )
        .expect("context");
        let orchestrator = Orchestrator::new(Arc::new(context), store.clone());
        Self {
            store,
            orchestrator,
        }
    }

    fn job(&self, target: &str) -> ScanJob {
        let seed = normalize_url(target).expect("seed url");
        self.store.create_job(&seed).expect("job")
    }

    async fn scan(&self, target: &str, config: ScanConfiguration) -> ScanReport {
        let job = self.job(target);
        self.orchestrator
            .run(job, config, CancellationToken::new())
            .await
            .expect("scan should reach a terminal state")
    }
}

async fn mount_page(server: &MockServer, page: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(page))
        .respond_with(html(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_scan_follows_in_scope_links_only() {
    let server = MockServer::start().await;
    let base = server.uri();

    mount_page(
        &server,
        "/",
        &format!(
            r#"<a href="/a">A</a> <a href="{base}/b">B</a> <a href="c">C</a>
               <a href="http://elsewhere.invalid/x">X</a>"#
        ),
    )
    .await;
    mount_page(&server, "/a", "a").await;
    mount_page(&server, "/b", "b").await;
    mount_page(&server, "/c", "c").await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&base, scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_fetched, 4);
    assert_eq!(report.pages_failed, 0);

    let urls = harness
        .store
        .list_discovered_urls(report.scan_id)
        .unwrap();
    assert_eq!(urls.iter().filter(|u| u.depth == 0).count(), 1);
    assert_eq!(urls.iter().filter(|u| u.depth == 1).count(), 3);
    assert!(urls.iter().all(|u| u.url.starts_with(&base)));
    assert!(urls.iter().all(|u| u.outcome == PageOutcome::Ok));

    let job = harness.store.get_job(report.scan_id).unwrap();
    assert_eq!(job.status, ScanStatus::Done);
}

#[tokio::test]
async fn test_unreachable_seed_fails_scan() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("slow").set_delay(Duration::from_secs(3)))
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let mut config = scan_config(2, 10);
    config.timeout = 0.5;

    let report = harness.scan(&server.uri(), config).await;

    assert_eq!(report.status, ScanStatus::Failed);
    assert!(report.failure.as_deref().unwrap_or("").contains("timeout"));
    assert_eq!(harness.store.count_discovered_urls(report.scan_id).unwrap(), 0);
    assert_eq!(
        harness.store.get_job(report.scan_id).unwrap().status,
        ScanStatus::Failed
    );
}

#[tokio::test]
async fn test_robots_disallowed_paths_are_never_fetched() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    mount_page(
        &server,
        "/",
        r#"<a href="/admin">Admin</a> <a href="/public">Public</a>"#,
    )
    .await;
    mount_page(&server, "/public", "public").await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(html("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(2, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.pages_skipped, 1);

    let urls = harness
        .store
        .list_discovered_urls(report.scan_id)
        .unwrap();
    assert!(urls.iter().all(|u| !u.url.ends_with("/admin")));
}

#[tokio::test]
async fn test_equivalent_links_are_fetched_once() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        r##"<a href="/a">1</a> <a href="/a#top">2</a> <a href="/x/../a">3</a>
            <a href="/a?">4</a> <a href="/">self</a>"##,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(html(r#"<a href="/">home</a>"#))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(3, 50)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(harness.store.count_discovered_urls(report.scan_id).unwrap(), 2);
}

#[tokio::test]
async fn test_page_budget_caps_accepted_urls() {
    let server = MockServer::start().await;

    let links: String = (1..=6)
        .map(|i| format!(r#"<a href="/p{i}">{i}</a>"#))
        .collect();
    mount_page(&server, "/", &links).await;
    for i in 1..=6 {
        mount_page(&server, &format!("/p{i}"), "leaf").await;
    }

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(2, 3)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(harness.store.count_discovered_urls(report.scan_id).unwrap(), 3);
    assert_eq!(report.pages_fetched, 3);
}

#[tokio::test]
async fn test_depth_limit_stops_descent() {
    let server = MockServer::start().await;

    mount_page(&server, "/", r#"<a href="/one">1</a>"#).await;
    mount_page(&server, "/one", r#"<a href="/two">2</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/two"))
        .respond_with(html("too deep"))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    let urls = harness
        .store
        .list_discovered_urls(report.scan_id)
        .unwrap();
    assert_eq!(urls.len(), 2);
    assert_eq!(urls.iter().map(|u| u.depth).max(), Some(1));
}

#[tokio::test]
async fn test_non_text_seed_is_skipped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89, b'P', b'N', b'G']),
        )
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_skipped, 1);

    let urls = harness
        .store
        .list_discovered_urls(report.scan_id)
        .unwrap();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].outcome, PageOutcome::Skipped);
    assert_eq!(urls[0].status_code, Some(200));
}

#[tokio::test]
async fn test_page_errors_do_not_fail_scan() {
    let server = MockServer::start().await;

    mount_page(
        &server,
        "/",
        r#"<a href="/missing">gone</a> <a href="/broken">broken</a>"#,
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let retry = RetryPolicy {
        attempts: 1,
        base_delay: Duration::from_millis(10),
        multiplier: 1.0,
    };
    let harness = Harness::new(retry);
    let report = harness.scan(&server.uri(), scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);

    let counts = harness.store.count_by_outcome(report.scan_id).unwrap();
    assert_eq!(counts.get(&PageOutcome::Ok), Some(&1));
    assert_eq!(counts.get(&PageOutcome::ClientError), Some(&1));
    assert_eq!(counts.get(&PageOutcome::ServerError), Some(&1));
}

#[tokio::test]
async fn test_forms_and_fingerprints_are_recorded() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(
            html(
                r#"<form action="/login" method="post">
                     <input name="user" type="text">
                     <input name="pass" type="password">
                   </form>
                   <form action="/login" method="post">
                     <input name="user" type="text">
                   </form>"#,
            )
            .insert_header("server", "nginx/1.25.3"),
        )
        .mount(&server)
        .await;
    mount_page(&server, "/login", "login").await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);

    let forms = harness.store.list_forms(report.scan_id).unwrap();
    assert_eq!(forms.len(), 1);
    assert_eq!(forms[0].form.method, "POST");
    assert_eq!(forms[0].form.fields.len(), 2);

    assert_eq!(report.forms, 1);

    let fingerprints = harness.store.list_fingerprints(report.scan_id).unwrap();
    let nginx = fingerprints
        .iter()
        .find(|f| f.signal.name == "nginx")
        .expect("nginx detected");
    assert_eq!(nginx.signal.version.as_deref(), Some("1.25.3"));
}

#[tokio::test]
async fn test_cancelled_scan_fails() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html("slow").set_delay(Duration::from_secs(10)))
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let mut config = scan_config(1, 10);
    config.timeout = 30.0;

    let job = harness.job(&server.uri());
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
    }

    let report = tokio::time::timeout(
        Duration::from_secs(5),
        harness.orchestrator.run(job, config, cancel),
    )
    .await
    .expect("cancellation is bounded by the grace period")
    .unwrap();

    assert_eq!(report.status, ScanStatus::Failed);
    assert!(report.failure.is_some());
    assert_eq!(
        harness.store.get_job(report.scan_id).unwrap().status,
        ScanStatus::Failed
    );
}

#[tokio::test]
async fn test_only_queued_jobs_run() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "home").await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(0, 1)).await;
    assert_eq!(report.status, ScanStatus::Done);

    let finished = harness.store.get_job(report.scan_id).unwrap();
    let rerun = harness
        .orchestrator
        .run(finished, scan_config(0, 1), CancellationToken::new())
        .await;

    assert!(matches!(
        rerun,
        Err(ScanError::InvalidTransition {
            from: ScanStatus::Done,
            to: ScanStatus::Running
        })
    ));
}

#[tokio::test]
async fn test_invalid_configuration_fails_scan() {
    let server = MockServer::start().await;
    mount_page(&server, "/", "home").await;

    let harness = Harness::new(RetryPolicy::none());
    let mut config = scan_config(1, 10);
    config.requests_per_second = 0.0;

    let report = harness.scan(&server.uri(), config).await;

    assert_eq!(report.status, ScanStatus::Failed);
    assert_eq!(harness.store.count_discovered_urls(report.scan_id).unwrap(), 0);
}

#[tokio::test]
async fn test_results_persist_on_disk() {
    let server = MockServer::start().await;
    mount_page(&server, "/", r#"<a href="/next">next</a>"#).await;
    mount_page(&server, "/next", "next").await;

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("probe.db");

    let scan_id = {
        let store = Arc::new(SqliteStore::new(&db_path).unwrap());
        let context = ScanContext::new(
            engine_config(),
            RetryPolicy::none(),
            SignatureTable::builtin().unwrap(),
        )
        .unwrap();
        let orchestrator = Orchestrator::new(Arc::new(context), store.clone());

        let job = store
            .create_job(&normalize_url(&server.uri()).unwrap())
            .unwrap();
        let report = orchestrator
            .run(job, scan_config(1, 10), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.status, ScanStatus::Done);
        report.scan_id
    };

    let reopened = SqliteStore::new(&db_path).unwrap();
    assert_eq!(reopened.get_job(scan_id).unwrap().status, ScanStatus::Done);
    assert_eq!(reopened.count_discovered_urls(scan_id).unwrap(), 2);
}

fn redirect_to(location: &str) -> ResponseTemplate {
    ResponseTemplate::new(302).insert_header("location", location)
}

fn outcome_of(harness: &Harness, scan_id: i64, suffix: &str) -> (Option<u16>, PageOutcome) {
    let urls = harness.store.list_discovered_urls(scan_id).unwrap();
    let url = urls
        .iter()
        .find(|u| u.url.ends_with(suffix))
        .unwrap_or_else(|| panic!("{} not recorded", suffix));
    (url.status_code, url.outcome)
}

#[tokio::test]
async fn test_redirect_into_disallowed_path_is_not_followed() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /admin\n"),
        )
        .mount(&server)
        .await;
    mount_page(&server, "/", r#"<a href="/go">go</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/go"))
        .respond_with(redirect_to("/admin"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/admin"))
        .respond_with(html("secret"))
        .expect(0)
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(2, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(report.pages_skipped, 1);
    assert_eq!(
        outcome_of(&harness, report.scan_id, "/go"),
        (Some(302), PageOutcome::Redirect)
    );
}

#[tokio::test]
async fn test_redirect_out_of_scope_is_not_followed() {
    let server = MockServer::start().await;
    let elsewhere = MockServer::start().await;

    mount_page(&server, "/", r#"<a href="/away">away</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/away"))
        .respond_with(redirect_to(&format!("{}/landing", elsewhere.uri())))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(html("elsewhere"))
        .expect(0)
        .mount(&elsewhere)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(2, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_fetched, 2);
    assert_eq!(
        outcome_of(&harness, report.scan_id, "/away"),
        (Some(302), PageOutcome::Redirect)
    );
    let urls = harness
        .store
        .list_discovered_urls(report.scan_id)
        .unwrap();
    assert!(urls.iter().all(|u| u.url.starts_with(&server.uri())));
}

#[tokio::test]
async fn test_in_scope_redirect_is_followed() {
    let server = MockServer::start().await;

    mount_page(&server, "/", r#"<a href="/old">old</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/old"))
        .respond_with(redirect_to("/new"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .respond_with(html("moved here"))
        .expect(1)
        .mount(&server)
        .await;

    let harness = Harness::new(RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(
        outcome_of(&harness, report.scan_id, "/old"),
        (Some(200), PageOutcome::Ok)
    );
}

#[tokio::test]
async fn test_redirect_loop_is_bounded() {
    let server = MockServer::start().await;

    mount_page(&server, "/", r#"<a href="/loop">loop</a>"#).await;
    Mock::given(method("GET"))
        .and(path("/loop"))
        .respond_with(redirect_to("/loop"))
        .expect(3)
        .mount(&server)
        .await;

    let engine = EngineConfig {
        max_redirects: 2,
        ..engine_config()
    };
    let harness = Harness::with_engine(engine, RetryPolicy::none());
    let report = harness.scan(&server.uri(), scan_config(1, 10)).await;

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_failed, 1);
    assert_eq!(
        outcome_of(&harness, report.scan_id, "/loop"),
        (Some(302), PageOutcome::NetworkFailure)
    );
}

#[tokio::test]
async fn test_huge_crawl_delay_is_capped() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nCrawl-delay: 1e300\n"),
        )
        .mount(&server)
        .await;
    mount_page(&server, "/", r#"<a href="/next">next</a>"#).await;
    mount_page(&server, "/next", "next").await;

    let engine = EngineConfig {
        max_crawl_delay: 0,
        ..engine_config()
    };
    let harness = Harness::with_engine(engine, RetryPolicy::none());
    let report = tokio::time::timeout(
        Duration::from_secs(10),
        harness.scan(&server.uri(), scan_config(1, 10)),
    )
    .await
    .expect("capped crawl delay should not stall the scan");

    assert_eq!(report.status, ScanStatus::Done);
    assert_eq!(report.pages_fetched, 2);
}
