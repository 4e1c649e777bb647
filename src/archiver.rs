use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::credentials::load_profile;
use crate::error::ArchiveError;
use crate::fetch::{http_client, Endpoints, WafLogsClient};
use crate::params::{validate, RequestDescriptor, Settings};
use crate::report::Report;
use crate::signer::{ApiKeySigner, RequestSigner};
use crate::store::{self, ArchiveSink, ObjectStorageSink, UploadResult};
use crate::utils::{object_key, TimeWindow};

/// Progress of one invocation. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ArchiveState {
    Start,
    Validating,
    Fetching,
    Writing,
    ReportedOk,
    ReportedError,
}

impl fmt::Display for ArchiveState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ArchiveState::Start => "start",
            ArchiveState::Validating => "validating",
            ArchiveState::Fetching => "fetching",
            ArchiveState::Writing => "writing",
            ArchiveState::ReportedOk => "reported_ok",
            ArchiveState::ReportedError => "reported_error",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
pub struct Invocation {
    state: ArchiveState,
}

impl Default for Invocation {
    fn default() -> Self {
        Invocation {
            state: ArchiveState::Start,
        }
    }
}

impl Invocation {
    pub fn state(&self) -> ArchiveState {
        self.state
    }

    fn enter(&mut self, next: ArchiveState) {
        if next == self.state {
            return;
        }
        debug_assert!(
            next > self.state && self.state < ArchiveState::ReportedOk,
            "cannot move from {} to {}",
            self.state,
            next
        );
        log::debug!("{} -> {}", self.state, next);
        self.state = next;
    }

    /// Fetches the previous day's logs and writes them to the sink. Nothing is
    /// written when the fetch fails.
    pub async fn archive(
        &mut self,
        descriptor: &RequestDescriptor,
        source: &WafLogsClient,
        sink: &dyn ArchiveSink,
        now: DateTime<Utc>,
    ) -> Result<UploadResult, ArchiveError> {
        self.enter(ArchiveState::Fetching);
        let window = TimeWindow::preceding_day(now);
        let logs = source.fetch(descriptor, &window).await?;

        self.enter(ArchiveState::Writing);
        let payload = pretty_payload(&logs)?;
        let key = object_key(&descriptor.domain, descriptor.category, now);
        sink.put(&key, payload).await
    }

    pub fn finish(&mut self, outcome: Result<UploadResult, ArchiveError>, settings: &Settings) -> Report {
        match outcome {
            Ok(result) => {
                self.enter(ArchiveState::ReportedOk);
                Report::success(result)
            }
            Err(e) => {
                log::error!("archiving failed while {}: {}", self.state, e);
                self.enter(ArchiveState::ReportedError);
                Report::failure(&e, settings)
            }
        }
    }
}

pub async fn fetch_and_archive(
    descriptor: &RequestDescriptor,
    source: &WafLogsClient,
    sink: &dyn ArchiveSink,
    now: DateTime<Utc>,
) -> Result<UploadResult, ArchiveError> {
    Invocation::default()
        .archive(descriptor, source, sink, now)
        .await
}

/// Re-serializes the fetched document with two-space indentation, keeping key order
/// and the exact digits of every number.
fn pretty_payload(logs: &[u8]) -> Result<Bytes, ArchiveError> {
    let document: serde_json::Value =
        serde_json::from_slice(logs).map_err(|e| ArchiveError::RemoteFetch {
            status: 200,
            body: format!("response is not valid JSON: {}", e),
        })?;
    let pretty = serde_json::to_vec_pretty(&document).map_err(ArchiveError::write)?;
    Ok(Bytes::from(pretty))
}

/// The clients one invocation talks to.
pub struct Connection {
    pub source: WafLogsClient,
    pub sink: Box<dyn ArchiveSink>,
}

/// Builds authenticated clients for a validated request.
pub trait Connect {
    fn connect(&self, descriptor: &RequestDescriptor) -> Result<Connection, ArchiveError>;
}

/// Connects with the local credential profile and the region's public endpoints.
pub struct ProfileConnector {
    pub config_file: PathBuf,
    pub profile: String,
    pub archive_url: Option<String>,
    pub settings: Settings,
}

impl Connect for ProfileConnector {
    fn connect(&self, descriptor: &RequestDescriptor) -> Result<Connection, ArchiveError> {
        let profile = load_profile(&self.config_file, &self.profile)?.with_region(&descriptor.region);
        let signer: Arc<dyn RequestSigner> = Arc::new(ApiKeySigner::from_profile(&profile)?);
        let endpoints = Endpoints::for_region(&descriptor.region, &self.settings)?;
        let http = http_client(&self.settings)?;

        let sink: Box<dyn ArchiveSink> = match &self.archive_url {
            Some(url) => Box::new(
                store::new(url)
                    .map_err(|e| ArchiveError::write(format!("{:#}", e)))?
                    .within(&descriptor.namespace, &descriptor.bucket),
            ),
            None => Box::new(ObjectStorageSink::new(
                http.clone(),
                endpoints.object_storage.clone(),
                descriptor,
                signer.clone(),
            )),
        };

        Ok(Connection {
            source: WafLogsClient::new(http, endpoints.waas, signer),
            sink,
        })
    }
}

/// validate -> fetch -> write -> report, exactly once.
pub async fn run(
    args: &[String],
    settings: &Settings,
    connector: &dyn Connect,
    now: DateTime<Utc>,
) -> Report {
    let mut invocation = Invocation::default();
    let outcome = drive(&mut invocation, args, settings, connector, now).await;
    invocation.finish(outcome, settings)
}

async fn drive(
    invocation: &mut Invocation,
    args: &[String],
    settings: &Settings,
    connector: &dyn Connect,
    now: DateTime<Utc>,
) -> Result<UploadResult, ArchiveError> {
    invocation.enter(ArchiveState::Validating);
    let descriptor = validate(args, settings)?;

    invocation.enter(ArchiveState::Fetching);
    let connection = connector.connect(&descriptor)?;
    invocation
        .archive(&descriptor, &connection.source, connection.sink.as_ref(), now)
        .await
}
