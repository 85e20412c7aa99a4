use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Domain, PushStatus};

/// Result of a push call, returned to the operator who triggered it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushOutcome {
    pub success: bool,
    pub status: PushStatus,
    pub message: String,
    pub needs_action: bool,
}

impl PushOutcome {
    /// Describes where a push journey stopped, based on the persisted domain.
    pub fn from_domain(domain: &Domain) -> Self {
        let status = domain.push.status;
        let message = match status {
            PushStatus::Active => format!("{} is active", domain.hostname),
            PushStatus::Failed | PushStatus::NeedsAction => domain
                .push
                .last_error
                .clone()
                .unwrap_or_else(|| format!("push for {} stopped in {status}", domain.hostname)),
            PushStatus::PlatformVerifying => format!(
                "waiting for the platform to verify {}, push again to resume polling",
                domain.hostname
            ),
            other => format!("push for {} is in progress ({other})", domain.hostname),
        };

        Self {
            success: status == PushStatus::Active,
            status,
            message,
            needs_action: status.needs_action(),
        }
    }
}

/// Read-only projection served to status polling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStatusReport {
    pub domain_id: String,
    pub hostname: String,
    pub status: PushStatus,
    pub needs_action: bool,
    pub last_error: Option<String>,
    pub attempt_count: u32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub dns_record_configured: bool,
    pub platform_registered: bool,
    pub updated_at: DateTime<Utc>,
}

impl PushStatusReport {
    pub fn from_domain(domain: &Domain) -> Self {
        let push = &domain.push;
        Self {
            domain_id: domain.id.clone(),
            hostname: domain.hostname.clone(),
            status: push.status,
            needs_action: push.status.needs_action(),
            last_error: push.last_error.clone(),
            attempt_count: push.attempt_count,
            last_attempt_at: push.last_attempt_at,
            dns_record_configured: push.provider_refs.dns_record_id.is_some(),
            platform_registered: push.provider_refs.platform_registration.is_some(),
            updated_at: domain.updated_at,
        }
    }
}
