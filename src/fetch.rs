use std::sync::Arc;

use bytes::Bytes;
use reqwest::StatusCode;
use url::Url;

use crate::error::ArchiveError;
use crate::params::{RequestDescriptor, Settings};
use crate::signer::{BodySigning, RequestSigner};
use crate::utils::TimeWindow;

const WAF_LOGS_API_VERSION: &str = "20181116";
const NEXT_PAGE_HEADER: &str = "opc-next-page";

/// Service hosts for one region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub waas: Url,
    pub object_storage: Url,
}

impl Endpoints {
    /// Region identifiers are lower-case ASCII letters, digits and hyphens; anything
    /// else could steer the request to another host.
    pub fn for_region(region: &str, settings: &Settings) -> Result<Self, ArchiveError> {
        let invalid = |reason: String| {
            ArchiveError::Transport(format!("invalid endpoint for region '{}': {}", region, reason))
        };
        let well_formed = !region.is_empty()
            && region
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
        if !well_formed {
            return Err(invalid("not a region identifier".to_string()));
        }

        let parse = |service: &str| {
            let host = format!("{}.{}.{}", service, region, settings.provider_domain);
            let url = Url::parse(&format!("https://{}", host)).map_err(|e| invalid(e.to_string()))?;
            if url.host_str() != Some(host.as_str()) {
                return Err(invalid(format!("resolves to {:?}", url.host_str())));
            }
            Ok(url)
        };
        Ok(Endpoints {
            waas: parse("waas")?,
            object_storage: parse("objectstorage")?,
        })
    }
}

/// Builds the reqwest client shared by the fetcher and the object-storage writer.
pub fn http_client(settings: &Settings) -> Result<reqwest::Client, ArchiveError> {
    let mut builder = reqwest::Client::builder();
    if let Some(timeout) = settings.timeout {
        builder = builder.connect_timeout(timeout).timeout(timeout);
    }
    builder
        .build()
        .map_err(|e| ArchiveError::Transport(e.to_string()))
}

/// Reads WAF edge logs for a policy from the logging API.
pub struct WafLogsClient {
    http: reqwest::Client,
    endpoint: Url,
    signer: Arc<dyn RequestSigner>,
}

impl WafLogsClient {
    pub fn new(http: reqwest::Client, endpoint: Url, signer: Arc<dyn RequestSigner>) -> Self {
        WafLogsClient {
            http,
            endpoint,
            signer,
        }
    }

    pub fn logs_url(
        &self,
        descriptor: &RequestDescriptor,
        window: &TimeWindow,
    ) -> Result<Url, ArchiveError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ArchiveError::Transport(format!("cannot use {} as a base", self.endpoint)))?
            .pop_if_empty()
            .extend([
                WAF_LOGS_API_VERSION,
                "waasPolicies",
                descriptor.policy_id.as_str(),
                "wafLogs",
            ]);
        url.query_pairs_mut()
            .append_pair("logType", descriptor.category.as_upper())
            .append_pair("timeObservedGreaterThanOrEqualTo", &window.start_param())
            .append_pair("timeObservedLessThan", &window.end_param())
            .append_pair("compartmentId", &descriptor.compartment_id);
        Ok(url)
    }

    /// One signed GET for the whole window. Returns the body untouched on 200.
    ///
    /// Continuation pages are not followed: when the service reports one, the
    /// archive only holds the first page and a warning is logged.
    pub async fn fetch(
        &self,
        descriptor: &RequestDescriptor,
        window: &TimeWindow,
    ) -> Result<Bytes, ArchiveError> {
        let url = self.logs_url(descriptor, window)?;
        log::info!(
            "fetching {} logs for {} between {} and {}",
            descriptor.category,
            descriptor.policy_id,
            window.start_param(),
            window.end_param()
        );

        let mut request = self
            .http
            .get(url)
            .build()
            .map_err(|e| ArchiveError::Transport(e.to_string()))?;
        self.signer.sign(&mut request, BodySigning::Exclude)?;

        let response = self
            .http
            .execute(request)
            .await
            .map_err(|e| ArchiveError::Transport(e.to_string()))?;

        let status = response.status();
        if response.headers().contains_key(NEXT_PAGE_HEADER) {
            log::warn!("log listing is paginated, only the first page will be archived");
        }
        let body = response
            .bytes()
            .await
            .map_err(|e| ArchiveError::Transport(e.to_string()))?;

        if status != StatusCode::OK {
            log::error!("log listing failed with HTTP {}", status.as_u16());
            return Err(ArchiveError::RemoteFetch {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        log::debug!("fetched {} bytes of logs", body.len());
        Ok(body)
    }
}
