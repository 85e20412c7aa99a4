use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A hostname bound to exactly one tenant site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    pub id: String,
    pub site_id: String,
    pub hostname: String,
    pub is_primary: bool,
    pub redirect_to_primary: bool,
    pub push: PushState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persisted progress of a domain push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushState {
    pub status: PushStatus,
    pub provider_refs: ProviderRefs,
    pub attempt_count: u32,
    pub self_heal_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Compare-and-set token, bumped on every orchestrator write.
    pub version: u64,
}

impl PushState {
    /// State of a freshly created domain row.
    pub fn initial() -> Self {
        Self {
            status: PushStatus::NotStarted,
            provider_refs: ProviderRefs::default(),
            attempt_count: 0,
            self_heal_count: 0,
            last_attempt_at: None,
            last_error: None,
            version: 0,
        }
    }
}

/// Identifiers handed out by the providers. Once set they are reused on
/// every retry and only disappear together with the domain row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderRefs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_record_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_registration: Option<String>,
}

impl ProviderRefs {
    /// Keeps every identifier already present and only fills the gaps from `other`.
    pub fn merged_with(&self, other: &ProviderRefs) -> ProviderRefs {
        ProviderRefs {
            dns_record_id: self
                .dns_record_id
                .clone()
                .or_else(|| other.dns_record_id.clone()),
            platform_registration: self
                .platform_registration
                .clone()
                .or_else(|| other.platform_registration.clone()),
        }
    }
}

/// States of the domain push state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    NotStarted,
    DnsConfiguring,
    DnsVerifying,
    PlatformRegistering,
    PlatformVerifying,
    Active,
    Failed,
    NeedsAction,
}

impl PushStatus {
    /// Returns the canonical database representation for the status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::DnsConfiguring => "dns_configuring",
            Self::DnsVerifying => "dns_verifying",
            Self::PlatformRegistering => "platform_registering",
            Self::PlatformVerifying => "platform_verifying",
            Self::Active => "active",
            Self::Failed => "failed",
            Self::NeedsAction => "needs_action",
        }
    }

    /// `true` once the journey has stopped, successfully or not.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Active | Self::Failed | Self::NeedsAction)
    }

    /// `true` for terminal states that only an operator can move forward.
    pub fn needs_action(self) -> bool {
        matches!(self, Self::Failed | Self::NeedsAction)
    }
}

impl fmt::Display for PushStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PushStatus {
    type Err = UnknownPushStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            // rows created before the state machine existed carry `pending`
            "not_started" | "pending" => Ok(Self::NotStarted),
            "dns_configuring" => Ok(Self::DnsConfiguring),
            "dns_verifying" => Ok(Self::DnsVerifying),
            "platform_registering" => Ok(Self::PlatformRegistering),
            "platform_verifying" => Ok(Self::PlatformVerifying),
            "active" => Ok(Self::Active),
            "failed" => Ok(Self::Failed),
            "needs_action" => Ok(Self::NeedsAction),
            other => Err(UnknownPushStatus(other.to_string())),
        }
    }
}

/// Raised when a persisted status string is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown push status `{0}`")]
pub struct UnknownPushStatus(pub String);

/// Minimal tenant information the push needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform_project_id: Option<String>,
}

/// Verification answer reported by the platform provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Verified,
    Misconfigured,
    Conflict,
}
