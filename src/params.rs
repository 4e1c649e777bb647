use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ArchiveError;

/// Categories of WAF edge logs the logging API can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogCategory {
    Access,
    Detect,
    Block,
}

impl LogCategory {
    pub const ALL: [LogCategory; 3] = [LogCategory::Access, LogCategory::Detect, LogCategory::Block];

    /// The form sent upstream as `logType`.
    pub fn as_upper(&self) -> &'static str {
        match self {
            LogCategory::Access => "ACCESS",
            LogCategory::Detect => "DETECT",
            LogCategory::Block => "BLOCK",
        }
    }

    /// The form used in archive object names.
    pub fn as_lower(&self) -> &'static str {
        match self {
            LogCategory::Access => "access",
            LogCategory::Detect => "detect",
            LogCategory::Block => "block",
        }
    }
}

impl fmt::Display for LogCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_upper())
    }
}

impl FromStr for LogCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACCESS" => Ok(LogCategory::Access),
            "DETECT" => Ok(LogCategory::Detect),
            "BLOCK" => Ok(LogCategory::Block),
            _ => Err(()),
        }
    }
}

/// Fixed values shared by validation and request construction. Built once at
/// start-up and passed down explicitly.
#[derive(Debug, Clone)]
pub struct Settings {
    pub valid_categories: Vec<LogCategory>,
    pub param_names: Vec<&'static str>,
    pub provider_domain: String,
    pub timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            valid_categories: LogCategory::ALL.to_vec(),
            param_names: vec![
                "region",
                "waf_policy_ocid",
                "compartment_ocid",
                "log_type",
                "webapp_domain",
                "bucket_name",
                "namespace",
            ],
            provider_domain: "oraclecloud.com".to_string(),
            timeout: None,
        }
    }
}

impl Settings {
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn valid_values(&self) -> Vec<String> {
        self.valid_categories
            .iter()
            .map(|c| c.as_upper().to_string())
            .collect()
    }
}

/// What to fetch and where to archive it, for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    pub region: String,
    pub policy_id: String,
    pub compartment_id: String,
    pub category: LogCategory,
    pub domain: String,
    pub bucket: String,
    pub namespace: String,
}

/// Checks the positional arguments and builds the request descriptor. Performs no I/O.
pub fn validate(args: &[String], settings: &Settings) -> Result<RequestDescriptor, ArchiveError> {
    let count_error = || ArchiveError::InvalidArgumentCount {
        expected: settings.param_names.len(),
        received: args.len(),
    };
    if args.len() != settings.param_names.len() {
        return Err(count_error());
    }
    let [region, policy_id, compartment_id, log_type, domain, bucket, namespace] = args else {
        return Err(count_error());
    };

    let category = log_type
        .parse::<LogCategory>()
        .ok()
        .filter(|c| settings.valid_categories.contains(c))
        .ok_or_else(|| ArchiveError::InvalidLogCategory {
            value: log_type.clone(),
            valid: settings.valid_values(),
        })?;

    Ok(RequestDescriptor {
        region: region.clone(),
        policy_id: policy_id.clone(),
        compartment_id: compartment_id.clone(),
        category,
        domain: domain.clone(),
        bucket: bucket.clone(),
        namespace: namespace.clone(),
    })
}

pub const EXAMPLE: &str = "waf-log-archiver eu-frankfurt-1 ocid1.waaspolicy.oc1..example \
ocid1.compartment.oc1..example ACCESS mywebapp mybucket mynamespace";

/// Expected argument order followed by one example invocation.
pub fn usage(settings: &Settings) -> String {
    let order = settings
        .param_names
        .iter()
        .map(|name| format!("<{}>", name))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "Usage:\n  waf-log-archiver {}\nExample:\n  {}",
        order, EXAMPLE
    )
}
