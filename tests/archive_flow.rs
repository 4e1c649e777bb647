use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use url::Url;

use waf_log_archiver::archiver::{fetch_and_archive, run, Connect, Connection, ProfileConnector};
use waf_log_archiver::error::ArchiveError;
use waf_log_archiver::fetch::WafLogsClient;
use waf_log_archiver::params::{validate, RequestDescriptor, Settings};
use waf_log_archiver::report::Report;
use waf_log_archiver::signer::{ApiKeySigner, BodySigning, RequestSigner};
use waf_log_archiver::store::ObjectStorageSink;

const API_KEY: &str = include_str!("fixtures/api_key.pem");
const LOGS_PATH: &str = "/20181116/waasPolicies/ocid1.waaspolicy.oc1..aaa/wafLogs";

/// Points both services at one mock server and counts how often it is asked to.
struct MockConnector {
    source_base: Url,
    sink_base: Url,
    signer: Arc<dyn RequestSigner>,
    connects: AtomicUsize,
}

impl MockConnector {
    fn new(server: &ServerGuard) -> Self {
        let base = Url::parse(&server.url()).unwrap();
        MockConnector {
            source_base: base.clone(),
            sink_base: base,
            signer: Arc::new(api_key_signer()),
            connects: AtomicUsize::new(0),
        }
    }

    fn with_source(mut self, base: Url) -> Self {
        self.source_base = base;
        self
    }

    fn with_sink(mut self, base: Url) -> Self {
        self.sink_base = base;
        self
    }

    fn with_signer(mut self, signer: Arc<dyn RequestSigner>) -> Self {
        self.signer = signer;
        self
    }
}

impl Connect for MockConnector {
    fn connect(&self, descriptor: &RequestDescriptor) -> Result<Connection, ArchiveError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let http = reqwest::Client::new();
        Ok(Connection {
            source: WafLogsClient::new(http.clone(), self.source_base.clone(), self.signer.clone()),
            sink: Box::new(ObjectStorageSink::new(
                http,
                self.sink_base.clone(),
                descriptor,
                self.signer.clone(),
            )),
        })
    }
}

/// Signs reads normally but cannot sign uploads.
struct ReadOnlySigner(ApiKeySigner);

impl RequestSigner for ReadOnlySigner {
    fn sign(&self, request: &mut reqwest::Request, body: BodySigning) -> Result<(), ArchiveError> {
        if request.method() == reqwest::Method::PUT {
            return Err(ArchiveError::Signing("key not usable for uploads".to_string()));
        }
        self.0.sign(request, body)
    }
}

fn api_key_signer() -> ApiKeySigner {
    ApiKeySigner::from_pem("ocid1.tenancy/ocid1.user/aa:bb".to_string(), API_KEY, None).unwrap()
}

/// A local address nothing listens on.
fn closed_port_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap()
}

fn invocation_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 7, 4, 9, 5, 3).unwrap()
}

fn args(category: &str) -> Vec<String> {
    [
        "eu-frankfurt-1",
        "ocid1.waaspolicy.oc1..aaa",
        "ocid1.compartment.oc1..bbb",
        category,
        "shop",
        "waf-archive",
        "tenancyns",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

async fn logs_mock(server: &mut ServerGuard, log_type: &str, status: usize, body: &str) -> Mock {
    server
        .mock("GET", Matcher::Regex(format!("^{}", LOGS_PATH)))
        .match_query(Matcher::AllOf(vec![
            Matcher::UrlEncoded("logType".into(), log_type.into()),
            Matcher::UrlEncoded(
                "timeObservedGreaterThanOrEqualTo".into(),
                "2024-07-03T00:00:00Z".into(),
            ),
            Matcher::UrlEncoded("timeObservedLessThan".into(), "2024-07-04T00:00:00Z".into()),
            Matcher::UrlEncoded("compartmentId".into(), "ocid1.compartment.oc1..bbb".into()),
        ]))
        .match_header(
            "authorization",
            Matcher::Regex("^Signature version=\"1\",headers=\"date \\(request-target\\) host\"".into()),
        )
        .with_status(status)
        .with_header("content-type", "application/json")
        .with_body(body)
        .create_async()
        .await
}

async fn unexpected_put(server: &mut ServerGuard) -> Mock {
    server
        .mock("PUT", Matcher::Any)
        .expect(0)
        .create_async()
        .await
}

fn to_value(report: &Report) -> Value {
    serde_json::from_str(&report.to_json()).unwrap()
}

#[tokio::test]
async fn archives_previous_day_and_reports_success() {
    let mut server = Server::new_async().await;
    let get = logs_mock(&mut server, "ACCESS", 200, r#"{"items":[]}"#).await;
    let put = server
        .mock(
            "PUT",
            Matcher::Regex("^/n/tenancyns/b/waf-archive/o/shop".into()),
        )
        .match_header("content-type", "application/json")
        .match_header("authorization", Matcher::Regex("^Signature ".into()))
        .match_body(Matcher::Exact("{\n  \"items\": []\n}".into()))
        .with_status(200)
        .with_header("etag", "\"abc123\"")
        .create_async()
        .await;

    let connector = MockConnector::new(&server);
    let report = run(&args("access"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert_eq!(report.exit_code(), 0);

    let value = to_value(&report);
    assert_eq!(value["message"], "Logs uploaded successfully");
    assert_eq!(value["bucket"], "waf-archive");
    assert_eq!(
        value["object_name"],
        "shop/2024/07/04/access-logs-20240704T090503.json"
    );
    assert_eq!(value["etag"], "abc123");
    assert_eq!(
        value["url"],
        format!(
            "{}/n/tenancyns/b/waf-archive/o/shop%2F2024%2F07%2F04%2Faccess-logs-20240704T090503.json",
            server.url()
        )
    );
    assert!(value.get("error").is_none());
}

#[tokio::test]
async fn any_case_category_is_sent_upper_case() {
    let mut server = Server::new_async().await;
    let get = logs_mock(&mut server, "DETECT", 200, "[]").await;
    let put = server
        .mock(
            "PUT",
            Matcher::Regex("detect-logs-20240704T090503.json$".into()),
        )
        .with_status(200)
        .with_header("etag", "xyz")
        .create_async()
        .await;

    let connector = MockConnector::new(&server);
    let report = run(&args("Detect"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert!(report.is_success());
    assert_eq!(to_value(&report)["etag"], "xyz");
}

#[tokio::test]
async fn invalid_category_makes_no_network_calls() {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", Matcher::Any)
        .expect(0)
        .create_async()
        .await;
    let put = unexpected_put(&mut server).await;

    let connector = MockConnector::new(&server);
    let report = run(&args("FOO"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(
        to_value(&report),
        json!({"error": "Invalid log type", "valid_values": ["ACCESS", "DETECT", "BLOCK"]})
    );
}

#[tokio::test]
async fn wrong_argument_count_makes_no_network_calls() {
    let server = Server::new_async().await;
    let connector = MockConnector::new(&server);
    let mut short = args("ACCESS");
    short.truncate(3);

    let report = run(&short, &Settings::default(), &connector, invocation_time()).await;

    assert_eq!(connector.connects.load(Ordering::SeqCst), 0);
    assert_eq!(report.exit_code(), 1);
    let value = to_value(&report);
    assert_eq!(value["error"], "Invalid argument count");
    assert_eq!(value["received"], 3);
}

#[tokio::test]
async fn fetch_failure_skips_upload() {
    let mut server = Server::new_async().await;
    let get = logs_mock(&mut server, "BLOCK", 403, r#"{"message":"not authorized"}"#).await;
    let put = unexpected_put(&mut server).await;

    let connector = MockConnector::new(&server);
    let report = run(&args("block"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert_eq!(report.exit_code(), 1);
    let value = to_value(&report);
    assert_eq!(value["error"], "HTTP 403");
    assert_eq!(value["status"], 403);
    assert_eq!(value["details"], r#"{"message":"not authorized"}"#);
    assert!(value.get("message").is_none());
}

#[tokio::test]
async fn upload_failure_is_not_reported_as_success() {
    let mut server = Server::new_async().await;
    let get = logs_mock(&mut server, "ACCESS", 200, "[]").await;
    let put = server
        .mock("PUT", Matcher::Any)
        .with_status(500)
        .with_body("InternalError")
        .create_async()
        .await;

    let connector = MockConnector::new(&server);
    let report = run(&args("ACCESS"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert!(!report.is_success());
    assert_eq!(report.exit_code(), 1);
    let value = to_value(&report);
    assert_eq!(value["error"], "Archive write failed");
    let details = value["details"].as_str().unwrap();
    assert!(details.contains("500"));
    assert!(details.contains("InternalError"));
}

#[tokio::test]
async fn unreachable_log_service_skips_upload() {
    let mut server = Server::new_async().await;
    let put = unexpected_put(&mut server).await;

    let connector = MockConnector::new(&server).with_source(closed_port_url());
    let report = run(&args("ACCESS"), &Settings::default(), &connector, invocation_time()).await;

    put.assert_async().await;
    assert_eq!(report.exit_code(), 1);
    let value = to_value(&report);
    assert_eq!(value["error"], "Log request failed");
    assert!(value["details"].is_string());
    assert!(value.get("message").is_none());
    assert!(value.get("etag").is_none());
}

#[tokio::test]
async fn unreachable_object_storage_is_a_write_failure() {
    let mut server = Server::new_async().await;
    let get = logs_mock(&mut server, "ACCESS", 200, "[]").await;

    let connector = MockConnector::new(&server).with_sink(closed_port_url());
    let report = run(&args("ACCESS"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    assert_eq!(report.exit_code(), 1);
    let value = to_value(&report);
    assert_eq!(value["error"], "Archive write failed");
    assert!(value.get("message").is_none());
    assert!(value.get("bucket").is_none());
}

#[tokio::test]
async fn upload_signing_failure_is_a_write_failure() {
    let mut server = Server::new_async().await;
    let get = logs_mock(&mut server, "ACCESS", 200, "[]").await;
    let put = unexpected_put(&mut server).await;

    let connector =
        MockConnector::new(&server).with_signer(Arc::new(ReadOnlySigner(api_key_signer())));
    let report = run(&args("ACCESS"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert_eq!(report.exit_code(), 1);
    let value = to_value(&report);
    assert_eq!(value["error"], "Archive write failed");
    assert!(value["details"]
        .as_str()
        .unwrap()
        .contains("key not usable for uploads"));
}

#[tokio::test]
async fn only_first_page_is_archived_when_listing_continues() {
    let mut server = Server::new_async().await;
    let get = server
        .mock("GET", Matcher::Regex(format!("^{}", LOGS_PATH)))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_header("opc-next-page", "page-2")
        .with_body(r#"[{"page":1}]"#)
        .expect(1)
        .create_async()
        .await;
    let put = server
        .mock("PUT", Matcher::Regex("^/n/tenancyns/b/waf-archive/o/".into()))
        .match_body(Matcher::Exact("[\n  {\n    \"page\": 1\n  }\n]".into()))
        .with_status(200)
        .with_header("etag", "p1")
        .expect(1)
        .create_async()
        .await;

    let connector = MockConnector::new(&server);
    let report = run(&args("ACCESS"), &Settings::default(), &connector, invocation_time()).await;

    get.assert_async().await;
    put.assert_async().await;
    assert!(report.is_success());
    assert_eq!(to_value(&report)["etag"], "p1");
}

#[tokio::test]
async fn fetch_and_archive_returns_upload_result() {
    let mut server = Server::new_async().await;
    let _get = logs_mock(&mut server, "ACCESS", 200, r#"[{"action":"ALLOW"}]"#).await;
    let _put = server
        .mock("PUT", Matcher::Any)
        .with_status(200)
        .with_header("etag", "\"v1\"")
        .create_async()
        .await;

    let connector = MockConnector::new(&server);
    let descriptor = validate(&args("ACCESS"), &Settings::default()).unwrap();
    let connection = connector.connect(&descriptor).unwrap();

    let result = fetch_and_archive(
        &descriptor,
        &connection.source,
        connection.sink.as_ref(),
        invocation_time(),
    )
    .await
    .unwrap();

    assert_eq!(result.bucket, "waf-archive");
    assert_eq!(result.etag.as_deref(), Some("v1"));
}

#[tokio::test]
async fn missing_credentials_are_reported() {
    let dir = tempfile::tempdir().unwrap();
    let connector = ProfileConnector {
        config_file: dir.path().join("config"),
        profile: "DEFAULT".to_string(),
        archive_url: None,
        settings: Settings::default(),
    };

    let report = run(&args("ACCESS"), &Settings::default(), &connector, invocation_time()).await;

    assert_eq!(report.exit_code(), 1);
    assert_eq!(to_value(&report)["error"], "Credential configuration error");
}
