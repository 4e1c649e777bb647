//! HTTP request signing for the provider's API-key authentication scheme.
//!
//! Each request carries an `Authorization: Signature ...` header whose signature
//! is RSA-SHA256 over a canonical list of headers. The cryptography itself comes
//! from the `rsa` crate; this module only assembles what gets signed.

use base64::{engine::general_purpose, Engine as _};
use chrono::Utc;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, DATE, HOST};
use reqwest::Request;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::{Digest, Sha256};

use crate::credentials::CredentialProfile;
use crate::error::ArchiveError;

const GENERIC_HEADERS: [&str; 3] = ["date", "(request-target)", "host"];
const BODY_HEADERS: [&str; 3] = ["x-content-sha256", "content-type", "content-length"];

/// Whether the request body takes part in the signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySigning {
    Exclude,
    Include,
}

/// Adds authentication to an outbound request just before it is sent.
pub trait RequestSigner: Send + Sync {
    fn sign(&self, request: &mut Request, body: BodySigning) -> Result<(), ArchiveError>;
}

/// Signs with the API key configured in a credential profile.
pub struct ApiKeySigner {
    key_id: String,
    signing_key: SigningKey<Sha256>,
}

impl std::fmt::Debug for ApiKeySigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeySigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

impl ApiKeySigner {
    pub fn from_profile(profile: &CredentialProfile) -> Result<Self, ArchiveError> {
        let pem = std::fs::read_to_string(&profile.key_file).map_err(|e| {
            ArchiveError::CredentialConfiguration(format!(
                "cannot read key file {}: {}",
                profile.key_file.display(),
                e
            ))
        })?;
        Self::from_pem(profile.key_id(), &pem, profile.pass_phrase.as_deref())
    }

    pub fn from_pem(
        key_id: String,
        pem: &str,
        pass_phrase: Option<&str>,
    ) -> Result<Self, ArchiveError> {
        let key = parse_private_key(pem, pass_phrase)?;
        Ok(ApiKeySigner {
            key_id,
            signing_key: SigningKey::<Sha256>::new(key),
        })
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }
}

fn parse_private_key(pem: &str, pass_phrase: Option<&str>) -> Result<RsaPrivateKey, ArchiveError> {
    let parsed = if pem.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        let pass_phrase = pass_phrase.ok_or_else(|| {
            ArchiveError::CredentialConfiguration(
                "private key is encrypted but no pass_phrase is configured".to_string(),
            )
        })?;
        RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass_phrase).map_err(|e| e.to_string())
    } else if pem.contains("BEGIN RSA PRIVATE KEY") {
        if pem.contains("Proc-Type: 4,ENCRYPTED") {
            return Err(ArchiveError::CredentialConfiguration(
                "legacy encrypted PEM keys are not supported, convert the key to PKCS#8".to_string(),
            ));
        }
        RsaPrivateKey::from_pkcs1_pem(pem).map_err(|e| e.to_string())
    } else {
        RsaPrivateKey::from_pkcs8_pem(pem).map_err(|e| e.to_string())
    };

    parsed.map_err(|e| ArchiveError::CredentialConfiguration(format!("invalid private key: {}", e)))
}

impl RequestSigner for ApiKeySigner {
    fn sign(&self, request: &mut Request, body: BodySigning) -> Result<(), ArchiveError> {
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let host = host_header(request)?;

        let headers = request.headers_mut();
        if !headers.contains_key(DATE) {
            headers.insert(DATE, header_value(&date)?);
        }
        headers.insert(HOST, header_value(&host)?);

        let mut signed: Vec<&str> = GENERIC_HEADERS.to_vec();
        if body == BodySigning::Include {
            let content = request
                .body()
                .and_then(|b| b.as_bytes())
                .map(|b| b.to_vec())
                .unwrap_or_default();
            let digest = general_purpose::STANDARD.encode(Sha256::digest(&content));
            let headers = request.headers_mut();
            headers.insert("x-content-sha256", header_value(&digest)?);
            headers.insert(CONTENT_LENGTH, HeaderValue::from(content.len()));
            if !headers.contains_key(CONTENT_TYPE) {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
            }
            signed.extend(BODY_HEADERS);
        }

        let plain = signing_string(request, &signed);
        let signature = general_purpose::STANDARD.encode(self.signing_key.sign(plain.as_bytes()).to_bytes());

        let authorization = format!(
            "Signature version=\"1\",headers=\"{}\",keyId=\"{}\",algorithm=\"rsa-sha256\",signature=\"{}\"",
            signed.join(" "),
            self.key_id,
            signature
        );
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&authorization)?);

        log::debug!("signed {} {} as {}", request.method(), request.url().path(), self.key_id);
        Ok(())
    }
}

fn header_value(value: &str) -> Result<HeaderValue, ArchiveError> {
    HeaderValue::from_str(value).map_err(|e| ArchiveError::Signing(e.to_string()))
}

fn host_header(request: &Request) -> Result<String, ArchiveError> {
    let url = request.url();
    let host = url
        .host_str()
        .ok_or_else(|| ArchiveError::Signing(format!("no host in {}", url)))?;
    Ok(match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}

/// The newline-joined `name: value` lines covered by the signature.
pub(crate) fn signing_string(request: &Request, signed: &[&str]) -> String {
    signed
        .iter()
        .map(|name| {
            let value = if *name == "(request-target)" {
                let url = request.url();
                let target = match url.query() {
                    Some(query) => format!("{}?{}", url.path(), query),
                    None => url.path().to_string(),
                };
                format!("{} {}", request.method().as_str().to_lowercase(), target)
            } else {
                request
                    .headers()
                    .get(*name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            };
            format!("{}: {}", name, value)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
