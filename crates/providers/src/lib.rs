//! Clients for the DNS provider and the hosting platform, plus the traits the
//! push orchestrator drives them through.

pub mod dns;
pub mod platform;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub use dns::DnsProviderClient;
pub use domain_push_core::VerificationState;
pub use platform::PlatformDomainClient;

const MAX_ERROR_BODY: usize = 512;

/// Record management at the DNS provider.
#[async_trait]
pub trait DnsProvider: Send + Sync {
    /// Returns `false` when the configured credential is rejected or disabled.
    async fn verify_credential(&self) -> Result<bool, ProviderError>;

    /// Creates the record for `hostname`, or corrects an existing one, and
    /// returns its identifier. Calling it again with the same input is a no-op.
    async fn ensure_record(
        &self,
        hostname: &str,
        target: &DnsTarget,
    ) -> Result<RecordRef, ProviderError>;

    /// Lists every A or CNAME record currently published for `hostname`.
    async fn find_records(&self, hostname: &str) -> Result<Vec<RecordRef>, ProviderError>;

    /// Removes a record. A record that no longer exists counts as removed.
    async fn delete_record(&self, record_id: &str) -> Result<(), ProviderError>;
}

/// Custom domain management at the hosting platform.
#[async_trait]
pub trait PlatformProvider: Send + Sync {
    /// Attaches `hostname` to the site's project. Re-registering a hostname the
    /// project already holds returns the existing registration.
    async fn register_domain(
        &self,
        hostname: &str,
        site: &SiteRef,
    ) -> Result<RegistrationRef, ProviderError>;

    async fn check_verification(
        &self,
        registration: &RegistrationRef,
    ) -> Result<VerificationState, ProviderError>;

    /// Detaches the hostname. A registration that no longer exists counts as removed.
    async fn remove_domain(&self, registration: &RegistrationRef) -> Result<(), ProviderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DnsRecordType {
    A,
    Cname,
}

impl DnsRecordType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::Cname => "CNAME",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "A" => Some(Self::A),
            "CNAME" => Some(Self::Cname),
            _ => None,
        }
    }
}

/// What a hostname should point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsTarget {
    pub record_type: DnsRecordType,
    pub content: String,
}

impl DnsTarget {
    pub fn cname(content: impl Into<String>) -> Self {
        Self {
            record_type: DnsRecordType::Cname,
            content: content.into(),
        }
    }

    pub fn a(content: impl Into<String>) -> Self {
        Self {
            record_type: DnsRecordType::A,
            content: content.into(),
        }
    }

    /// True when `record` already points where this target does.
    pub fn matches(&self, record: &RecordRef) -> bool {
        record.record_type == self.record_type
            && record.content.eq_ignore_ascii_case(&self.content)
    }
}

/// A record as published at the DNS provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub id: String,
    pub name: String,
    pub record_type: DnsRecordType,
    pub content: String,
}

/// The platform project a hostname is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRef {
    pub site_id: String,
    pub project_id: String,
}

/// Identifies a hostname registration at the platform. Persisted as
/// `project/hostname`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRef {
    pub project_id: String,
    pub hostname: String,
}

impl fmt::Display for RegistrationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project_id, self.hostname)
    }
}

impl FromStr for RegistrationRef {
    type Err = ProviderError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.split_once('/') {
            Some((project_id, hostname)) if !project_id.is_empty() && !hostname.is_empty() => {
                Ok(Self {
                    project_id: project_id.to_string(),
                    hostname: hostname.to_string(),
                })
            }
            _ => Err(ProviderError::Decode(format!(
                "malformed registration reference `{value}`"
            ))),
        }
    }
}

/// How the orchestrator should react to a provider failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The credential is invalid or lacks permission. Retrying cannot help.
    Credential,
    /// Rate limits, timeouts, server errors. Worth retrying with backoff.
    Transient,
    /// The hostname is held by someone else. Needs an operator.
    Conflict,
    /// A local bug or malformed configuration.
    Fatal,
}

/// Errors produced by the provider clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to build url: {0}")]
    Url(#[from] url::ParseError),
    #[error("credential rejected ({status}): {body}")]
    Auth { status: StatusCode, body: String },
    #[error("rate limited: {body}")]
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
    #[error("unexpected status {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    #[error("invalid provider response: {0}")]
    Decode(String),
    #[error("hostname conflict: {0}")]
    Conflict(String),
}

impl ProviderError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Auth { .. } => ErrorClass::Credential,
            Self::RateLimited { .. }
            | Self::Status { .. }
            | Self::Network(_)
            | Self::Decode(_) => ErrorClass::Transient,
            Self::Conflict(_) => ErrorClass::Conflict,
            Self::Url(_) => ErrorClass::Fatal,
        }
    }

    /// Delay the provider asked for before the next attempt.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Network(err)
        }
    }
}

/// Maps non-success statuses onto [`ProviderError`] and passes successful
/// responses through.
async fn check_status(response: Response) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let retry_after = parse_retry_after(&response);
    let body = read_body(response).await;
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth { status, body },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited { retry_after, body },
        _ => ProviderError::Status { status, body },
    })
}

async fn parse_json<T>(response: Response) -> Result<T, ProviderError>
where
    T: DeserializeOwned,
{
    let response = check_status(response).await?;
    Ok(response.json().await?)
}

async fn read_body(response: Response) -> String {
    let mut body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<unavailable>"));
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    body
}

fn parse_retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
