use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::error::ArchiveError;

pub const DEFAULT_PROFILE: &str = "DEFAULT";

/// Identity used to sign outbound requests, as configured in the provider's config file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialProfile {
    pub tenancy: String,
    pub user: String,
    pub fingerprint: String,
    pub key_file: PathBuf,
    pub pass_phrase: Option<String>,
    pub region: Option<String>,
}

impl CredentialProfile {
    pub fn key_id(&self) -> String {
        format!("{}/{}/{}", self.tenancy, self.user, self.fingerprint)
    }

    /// Applies the region given at invocation on top of the loaded profile.
    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }
}

/// `~/.oci/config`
pub fn default_config_path() -> PathBuf {
    home_dir().join(".oci").join("config")
}

pub fn load_profile(path: &Path, profile: &str) -> Result<CredentialProfile, ArchiveError> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read config file {}", path.display()))
        .map_err(config_error)?;
    parse_profile(&content, profile)
        .with_context(|| format!("profile [{}] in {}", profile, path.display()))
        .map_err(config_error)
}

fn config_error(e: anyhow::Error) -> ArchiveError {
    ArchiveError::CredentialConfiguration(format!("{:#}", e))
}

fn parse_profile(content: &str, profile: &str) -> Result<CredentialProfile, anyhow::Error> {
    let sections = parse_sections(content);

    // named profiles inherit anything they don't set from [DEFAULT]
    let mut values = sections.get(DEFAULT_PROFILE).cloned().unwrap_or_default();
    match sections.get(profile) {
        Some(section) => values.extend(section.clone()),
        None => anyhow::bail!("profile not found"),
    }

    let required = |key: &str| {
        values
            .get(key)
            .filter(|v| !v.is_empty())
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("missing required key '{}'", key))
    };

    Ok(CredentialProfile {
        tenancy: required("tenancy")?,
        user: required("user")?,
        fingerprint: required("fingerprint")?,
        key_file: expand_home(&required("key_file")?),
        pass_phrase: values.get("pass_phrase").filter(|v| !v.is_empty()).cloned(),
        region: values.get("region").filter(|v| !v.is_empty()).cloned(),
    })
}

fn parse_sections(content: &str) -> HashMap<String, HashMap<String, String>> {
    let mut sections: HashMap<String, HashMap<String, String>> = HashMap::new();
    let mut current: Option<String> = None;

    for line in content.lines().map(str::trim) {
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            let name = name.trim().to_string();
            sections.entry(name.clone()).or_default();
            current = Some(name);
            continue;
        }
        if let (Some(section), Some((key, value))) = (&current, line.split_once('=')) {
            sections
                .entry(section.clone())
                .or_default()
                .insert(key.trim().to_string(), value.trim().to_string());
        }
    }

    sections
}

fn home_dir() -> PathBuf {
    env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().join(rest),
        None => PathBuf::from(path),
    }
}
