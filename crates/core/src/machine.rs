//! Domain push state machine.
//!
//! [`apply`] is pure: it takes the persisted [`PushState`] and the outcome of
//! the provider call(s) made for the current step, and returns the transition
//! the orchestrator must persist. All provider I/O lives in the app crate.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{ProviderRefs, PushState, PushStatus, VerificationState};

/// Ceilings applied by the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushLimits {
    /// Consecutive transient failures tolerated for one step.
    pub max_attempts: u32,
    /// `misconfigured → dns_configuring` loops tolerated per journey.
    pub max_self_heals: u32,
}

impl Default for PushLimits {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            max_self_heals: 3,
        }
    }
}

/// Outcome of the work done for the current step.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Operator asked for a push (fresh start or restart after a terminal failure).
    Requested,
    RecordEnsured { record_id: String },
    RecordVisible,
    Registered { registration: String },
    Verification(VerificationState),
    /// The platform reports the hostname as owned by someone else.
    Conflict { detail: String },
    CredentialRejected { detail: String },
    Transient {
        detail: String,
        retry_after: Option<Duration>,
    },
    /// Local misconfiguration that retrying cannot fix.
    Fatal { detail: String },
}

impl PushEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::RecordEnsured { .. } => "record_ensured",
            Self::RecordVisible => "record_visible",
            Self::Registered { .. } => "registered",
            Self::Verification(VerificationState::Pending) => "verification_pending",
            Self::Verification(VerificationState::Verified) => "verified",
            Self::Verification(VerificationState::Misconfigured) => "misconfigured",
            Self::Verification(VerificationState::Conflict) => "verification_conflict",
            Self::Conflict { .. } => "conflict",
            Self::CredentialRejected { .. } => "credential_rejected",
            Self::Transient { .. } => "transient_error",
            Self::Fatal { .. } => "fatal_error",
        }
    }
}

/// Result of applying an event.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing to persist; poll again later.
    Wait,
    Move(Transition),
}

/// A state change to persist atomically.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: PushStatus,
    pub to: PushStatus,
    pub event: &'static str,
    /// Identifiers obtained during this step; merged without overwriting.
    pub refs: ProviderRefs,
    pub attempt_count: u32,
    pub self_heal_count: u32,
    pub last_error: Option<String>,
    /// Provider response summary recorded in the push log.
    pub detail: String,
    pub retry_after: Option<Duration>,
}

impl Transition {
    /// `true` when the step failed transiently and must be retried in place.
    pub fn is_retry(&self) -> bool {
        self.from == self.to && !self.to.is_terminal()
    }

    /// Builds the state that results from persisting this transition.
    pub fn apply_to(&self, state: &PushState, now: DateTime<Utc>) -> PushState {
        PushState {
            status: self.to,
            provider_refs: state.provider_refs.merged_with(&self.refs),
            attempt_count: self.attempt_count,
            self_heal_count: self.self_heal_count,
            last_attempt_at: Some(now),
            last_error: self.last_error.clone(),
            version: state.version + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("event `{event}` is not valid in state `{from}`")]
    Invalid {
        from: PushStatus,
        event: &'static str,
    },
}

/// Computes the next step for `state` given `event`.
pub fn apply(
    state: &PushState,
    event: PushEvent,
    limits: &PushLimits,
) -> Result<Step, TransitionError> {
    let from = state.status;
    let label = event.label();
    let invalid = || TransitionError::Invalid { from, event: label };

    let advance = |to: PushStatus, refs: ProviderRefs, detail: String| Transition {
        from,
        to,
        event: label,
        refs,
        attempt_count: 0,
        self_heal_count: state.self_heal_count,
        last_error: None,
        detail,
        retry_after: None,
    };
    let stop = |to: PushStatus, error: String| Transition {
        from,
        to,
        event: label,
        refs: ProviderRefs::default(),
        attempt_count: state.attempt_count,
        self_heal_count: state.self_heal_count,
        last_error: Some(error.clone()),
        detail: error,
        retry_after: None,
    };

    let transition = match event {
        PushEvent::Requested => match from {
            PushStatus::NotStarted => Transition {
                self_heal_count: 0,
                ..advance(
                    PushStatus::DnsConfiguring,
                    ProviderRefs::default(),
                    "push requested".to_string(),
                )
            },
            PushStatus::Failed | PushStatus::NeedsAction => Transition {
                self_heal_count: 0,
                ..advance(
                    PushStatus::DnsConfiguring,
                    ProviderRefs::default(),
                    format!("push restarted from {from}"),
                )
            },
            _ => return Err(invalid()),
        },
        PushEvent::RecordEnsured { record_id } => {
            if from != PushStatus::DnsConfiguring {
                return Err(invalid());
            }
            let detail = format!("dns record {record_id} ensured");
            advance(
                PushStatus::DnsVerifying,
                ProviderRefs {
                    dns_record_id: Some(record_id),
                    platform_registration: None,
                },
                detail,
            )
        }
        PushEvent::RecordVisible => {
            if from != PushStatus::DnsVerifying {
                return Err(invalid());
            }
            advance(
                PushStatus::PlatformRegistering,
                ProviderRefs::default(),
                "dns record reported by provider".to_string(),
            )
        }
        PushEvent::Registered { registration } => {
            if from != PushStatus::PlatformRegistering {
                return Err(invalid());
            }
            let detail = format!("platform registration {registration} stored");
            advance(
                PushStatus::PlatformVerifying,
                ProviderRefs {
                    dns_record_id: None,
                    platform_registration: Some(registration),
                },
                detail,
            )
        }
        PushEvent::Verification(verification) => {
            if from != PushStatus::PlatformVerifying {
                return Err(invalid());
            }
            match verification {
                VerificationState::Pending => return Ok(Step::Wait),
                VerificationState::Verified => Transition {
                    self_heal_count: 0,
                    ..advance(
                        PushStatus::Active,
                        ProviderRefs::default(),
                        "platform verified the domain".to_string(),
                    )
                },
                VerificationState::Misconfigured => {
                    if state.self_heal_count >= limits.max_self_heals {
                        stop(
                            PushStatus::Failed,
                            format!(
                                "platform still reports misconfigured DNS after {} reconfiguration attempts",
                                state.self_heal_count
                            ),
                        )
                    } else {
                        let message = "platform reported misconfigured DNS, reconfiguring".to_string();
                        Transition {
                            self_heal_count: state.self_heal_count + 1,
                            last_error: Some(message.clone()),
                            ..advance(PushStatus::DnsConfiguring, ProviderRefs::default(), message)
                        }
                    }
                }
                VerificationState::Conflict => stop(
                    PushStatus::NeedsAction,
                    "hostname is already claimed by another project on the platform".to_string(),
                ),
            }
        }
        PushEvent::Conflict { detail } => {
            if from.is_terminal() || from == PushStatus::NotStarted {
                return Err(invalid());
            }
            stop(PushStatus::NeedsAction, detail)
        }
        PushEvent::CredentialRejected { detail } | PushEvent::Fatal { detail } => {
            if from.is_terminal() || from == PushStatus::NotStarted {
                return Err(invalid());
            }
            stop(PushStatus::Failed, detail)
        }
        PushEvent::Transient {
            detail,
            retry_after,
        } => {
            if from.is_terminal() || from == PushStatus::NotStarted {
                return Err(invalid());
            }
            let attempts = state.attempt_count + 1;
            if attempts >= limits.max_attempts {
                let message = format!("{detail} (gave up after {attempts} attempts)");
                Transition {
                    attempt_count: attempts,
                    ..stop(PushStatus::Failed, message)
                }
            } else {
                Transition {
                    from,
                    to: from,
                    event: label,
                    refs: ProviderRefs::default(),
                    attempt_count: attempts,
                    self_heal_count: state.self_heal_count,
                    last_error: Some(detail.clone()),
                    detail,
                    retry_after,
                }
            }
        }
    };

    Ok(Step::Move(transition))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(status: PushStatus) -> PushState {
        PushState {
            status,
            ..PushState::initial()
        }
    }

    fn moved(step: Step) -> Transition {
        match step {
            Step::Move(transition) => transition,
            Step::Wait => panic!("expected a transition"),
        }
    }

    fn limits() -> PushLimits {
        PushLimits {
            max_attempts: 3,
            max_self_heals: 2,
        }
    }

    #[test]
    fn happy_path_walks_every_state() {
        let mut current = PushState::initial();
        let events = [
            PushEvent::Requested,
            PushEvent::RecordEnsured {
                record_id: "rec-1".into(),
            },
            PushEvent::RecordVisible,
            PushEvent::Registered {
                registration: "prj/blog.example.com".into(),
            },
            PushEvent::Verification(VerificationState::Verified),
        ];
        let mut seen = vec![current.status];
        for event in events {
            let transition = moved(apply(&current, event, &limits()).expect("valid"));
            current = transition.apply_to(&current, Utc::now());
            seen.push(current.status);
        }

        assert_eq!(
            seen,
            vec![
                PushStatus::NotStarted,
                PushStatus::DnsConfiguring,
                PushStatus::DnsVerifying,
                PushStatus::PlatformRegistering,
                PushStatus::PlatformVerifying,
                PushStatus::Active,
            ]
        );
        assert_eq!(current.provider_refs.dns_record_id.as_deref(), Some("rec-1"));
        assert_eq!(
            current.provider_refs.platform_registration.as_deref(),
            Some("prj/blog.example.com")
        );
        assert_eq!(current.version, 5);
        assert!(current.last_error.is_none());
    }

    #[test]
    fn pending_verification_waits_without_persisting() {
        let step = apply(
            &state(PushStatus::PlatformVerifying),
            PushEvent::Verification(VerificationState::Pending),
            &limits(),
        )
        .expect("valid");
        assert_eq!(step, Step::Wait);
    }

    #[test]
    fn transient_failures_retry_until_ceiling() {
        let mut current = state(PushStatus::DnsVerifying);
        for expected in 1..3 {
            let transition = moved(
                apply(
                    &current,
                    PushEvent::Transient {
                        detail: "timeout".into(),
                        retry_after: None,
                    },
                    &limits(),
                )
                .expect("valid"),
            );
            assert!(transition.is_retry());
            current = transition.apply_to(&current, Utc::now());
            assert_eq!(current.attempt_count, expected);
            assert_eq!(current.status, PushStatus::DnsVerifying);
        }

        let transition = moved(
            apply(
                &current,
                PushEvent::Transient {
                    detail: "timeout".into(),
                    retry_after: None,
                },
                &limits(),
            )
            .expect("valid"),
        );
        assert_eq!(transition.to, PushStatus::Failed);
        assert!(transition
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("gave up after 3 attempts")));
    }

    #[test]
    fn misconfigured_loops_back_until_heal_budget_is_spent() {
        let current = state(PushStatus::PlatformVerifying);
        let transition = moved(
            apply(
                &current,
                PushEvent::Verification(VerificationState::Misconfigured),
                &limits(),
            )
            .expect("valid"),
        );
        assert_eq!(transition.to, PushStatus::DnsConfiguring);
        assert_eq!(transition.self_heal_count, 1);

        let exhausted = PushState {
            self_heal_count: 2,
            ..state(PushStatus::PlatformVerifying)
        };
        let transition = moved(
            apply(
                &exhausted,
                PushEvent::Verification(VerificationState::Misconfigured),
                &limits(),
            )
            .expect("valid"),
        );
        assert_eq!(transition.to, PushStatus::Failed);
    }

    #[test]
    fn conflict_requires_operator_action() {
        let transition = moved(
            apply(
                &state(PushStatus::PlatformVerifying),
                PushEvent::Verification(VerificationState::Conflict),
                &limits(),
            )
            .expect("valid"),
        );
        assert_eq!(transition.to, PushStatus::NeedsAction);
        assert!(transition.to.needs_action());
    }

    #[test]
    fn credential_rejection_fails_immediately() {
        let transition = moved(
            apply(
                &state(PushStatus::DnsConfiguring),
                PushEvent::CredentialRejected {
                    detail: "token expired".into(),
                },
                &limits(),
            )
            .expect("valid"),
        );
        assert_eq!(transition.to, PushStatus::Failed);
        assert_eq!(transition.last_error.as_deref(), Some("token expired"));
    }

    #[test]
    fn restart_from_failure_keeps_refs_and_resets_counters() {
        let failed = PushState {
            status: PushStatus::Failed,
            attempt_count: 6,
            self_heal_count: 2,
            provider_refs: ProviderRefs {
                dns_record_id: Some("rec-1".into()),
                platform_registration: None,
            },
            last_error: Some("boom".into()),
            ..PushState::initial()
        };
        let transition = moved(apply(&failed, PushEvent::Requested, &limits()).expect("valid"));
        let next = transition.apply_to(&failed, Utc::now());
        assert_eq!(next.status, PushStatus::DnsConfiguring);
        assert_eq!(next.attempt_count, 0);
        assert_eq!(next.self_heal_count, 0);
        assert_eq!(next.provider_refs.dns_record_id.as_deref(), Some("rec-1"));
        assert!(next.last_error.is_none());
    }

    #[test]
    fn rejects_events_out_of_order() {
        let err = apply(
            &state(PushStatus::NotStarted),
            PushEvent::RecordVisible,
            &limits(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                from: PushStatus::NotStarted,
                event: "record_visible"
            }
        );
        assert!(apply(&state(PushStatus::Active), PushEvent::Requested, &limits()).is_err());
    }
}
