//! Escalation State Machine.
//!
//! One open case per user. The engine reads the case, decides, persists the
//! decision through a compare-and-swap on the case version, and only then
//! applies effects (notifications, tier checks). A lost CAS race re-reads
//! and re-decides; a transition that failed to persist has not happened and
//! the next sweep retries it.

pub mod handlers;
pub mod transitions;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::PolicyConfig;
use crate::errors::AppError;
use crate::models::case::{CaseTier, EscalationCase, TierRecord};
use crate::models::event::{RiskEvent, Severity};
use crate::models::notification::{DeliveryMethod, Destination, NotificationPriority};
use crate::repo::Repository;
use crate::scheduler::{self, NotificationDraft};
use transitions::is_legal_transition;

/// Attempts before a CAS race is surfaced as a conflict; the next sweep
/// picks the case up again either way.
const CAS_ATTEMPTS: u32 = 3;

const TIER1_CONTENT: &str =
    "Hi, just checking in. How are you feeling right now? Reply when you can.";
const TIER2_CONTENT: &str = "We noticed some worrying signals and haven't heard back from you. \
     Please reply 'safe' if you're okay, or 'help' if you need support now.";
const CONTACT_ALERT_CONTENT: &str = "Haven alert: someone who lists you as an emergency contact \
     may need support and has not responded to our check-ins. Please reach out to them now.";

/// Tier timeouts that are not per-priority (those live in `RatePolicy`).
#[derive(Debug, Clone)]
pub struct TierTimeouts {
    pub tier1_minutes: i64,
    /// Final grace window in Tier3 before the case expires.
    pub tier3_grace_minutes: i64,
}

impl Default for TierTimeouts {
    fn default() -> Self {
        Self {
            tier1_minutes: 240,
            tier3_grace_minutes: 30,
        }
    }
}

pub fn case_priority(case: &EscalationCase) -> NotificationPriority {
    NotificationPriority::from_severity(case.severity, case.immediate)
}

/// Wall-clock deadline of the case's current tier, if it has one.
pub fn tier_deadline(case: &EscalationCase, policy: &PolicyConfig) -> Option<DateTime<Utc>> {
    let entered = case.current_tier_entered_at();
    match case.current_tier {
        CaseTier::Tier1Gentle => Some(entered + Duration::minutes(policy.timeouts.tier1_minutes)),
        CaseTier::Tier2Urgent => {
            let rule = policy.rate.rule(case_priority(case));
            Some(entered + Duration::minutes(rule.escalation_timeout_minutes))
        }
        CaseTier::Tier3ContactAlert => {
            Some(entered + Duration::minutes(policy.timeouts.tier3_grace_minutes))
        }
        _ => None,
    }
}

fn apply_transition(
    case: &mut EscalationCase,
    to: CaseTier,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if !is_legal_transition(case.current_tier, to) {
        return Err(AppError::Conflict(format!(
            "illegal tier transition {} -> {} on case {}",
            case.current_tier, to, case.id
        )));
    }
    case.current_tier = to;
    case.last_action_at = now;
    case.tier_history.push(TierRecord {
        tier: to,
        entered_at: now,
        reason: Some(reason.to_string()),
    });
    Ok(())
}

/// Feeds one actionable event into the state machine: merges it into the
/// user's open case or opens a new one. Returns the resulting case.
pub async fn feed_event(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    event: &RiskEvent,
    now: DateTime<Utc>,
) -> Result<EscalationCase, AppError> {
    for _ in 0..CAS_ATTEMPTS {
        match repo.open_case_for_user(event.user_id).await? {
            Some(case) => {
                let expected = case.version;
                let mut updated = case;
                updated.severity = updated.severity.max(event.severity);
                updated.immediate = updated.immediate || event.requires_immediate;
                updated.last_action_at = now;

                // A critical immediate signal while the case is still at the
                // gentle tier advances it one step; it never skips.
                let advance = updated.current_tier == CaseTier::Tier1Gentle
                    && event.severity == Severity::Critical
                    && event.requires_immediate;
                if advance {
                    apply_transition(
                        &mut updated,
                        CaseTier::Tier2Urgent,
                        &format!("merged: {} critical immediate", event.source_type),
                        now,
                    )?;
                }

                if repo.update_case(&updated, expected).await? {
                    updated.version = expected + 1;
                    info!(
                        "Merged {} event {} into case {} (tier {})",
                        event.source_type, event.id, updated.id, updated.current_tier
                    );
                    if advance {
                        enter_tier_effects(repo, policy, &updated, now).await?;
                    }
                    return Ok(updated);
                }
                // Lost the race; re-read and re-decide.
            }
            None => {
                let mut case = EscalationCase::open(
                    event.user_id,
                    event.id,
                    event.severity,
                    event.requires_immediate,
                    now,
                );
                let first = if event.severity == Severity::Critical && event.requires_immediate {
                    CaseTier::Tier2Urgent
                } else {
                    CaseTier::Tier1Gentle
                };
                apply_transition(
                    &mut case,
                    first,
                    &format!("opened: {} {}", event.source_type, event.severity),
                    now,
                )?;
                repo.insert_case(&case).await?;
                info!(
                    "Opened case {} for user {} at {}",
                    case.id, case.user_id, case.current_tier
                );
                enter_tier_effects(repo, policy, &case, now).await?;
                return Ok(case);
            }
        }
    }
    Err(AppError::Conflict(format!(
        "case update contention for user {}",
        event.user_id
    )))
}

/// Advances an open case whose current tier deadline has passed. Invoked
/// both by consuming a `system` tier check and by the sweep's safety-net
/// scan, so a lost tier check delays an escalation but never drops it.
pub async fn check_deadline(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    case_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<CaseTier>, AppError> {
    for _ in 0..CAS_ATTEMPTS {
        let Some(case) = repo.get_case(case_id).await? else {
            return Ok(None);
        };
        if !case.is_open() {
            return Ok(None);
        }
        let Some(deadline) = tier_deadline(&case, policy) else {
            return Ok(None);
        };
        if now < deadline {
            return Ok(None);
        }
        let Some(next) = case.current_tier.on_timeout() else {
            return Ok(None);
        };

        let expected = case.version;
        let mut updated = case;
        apply_transition(&mut updated, next, "timeout", now)?;
        if repo.update_case(&updated, expected).await? {
            updated.version = expected + 1;
            if next.is_terminal() {
                let cancelled = repo.cancel_pending_for_case(updated.id).await?;
                info!(
                    "Case {} expired after the contact-alert grace window \
                     ({cancelled} pending notifications cancelled)",
                    updated.id
                );
            } else {
                info!("Case {} timed out into {}", updated.id, next);
                enter_tier_effects(repo, policy, &updated, now).await?;
            }
            return Ok(Some(next));
        }
    }
    Err(AppError::Conflict(format!(
        "case update contention on case {case_id}"
    )))
}

/// Resolves the user's open case on a qualifying response, cancelling its
/// pending notifications. No open case means nothing to do.
pub async fn resolve_for_user(
    repo: &dyn Repository,
    user_id: Uuid,
    reason: &str,
    now: DateTime<Utc>,
) -> Result<Option<EscalationCase>, AppError> {
    for _ in 0..CAS_ATTEMPTS {
        let Some(case) = repo.open_case_for_user(user_id).await? else {
            return Ok(None);
        };
        let expected = case.version;
        let mut updated = case;
        apply_transition(&mut updated, CaseTier::Resolved, reason, now)?;
        if repo.update_case(&updated, expected).await? {
            updated.version = expected + 1;
            let cancelled = repo.cancel_pending_for_case(updated.id).await?;
            info!(
                "Resolved case {} for user {user_id} ({cancelled} pending notifications cancelled)",
                updated.id
            );
            return Ok(Some(updated));
        }
    }
    Err(AppError::Conflict(format!(
        "case update contention for user {user_id}"
    )))
}

/// Side effects of entering the case's current tier. Runs only after the
/// tier change is durable, so a failed persist never produces a stray
/// notification.
async fn enter_tier_effects(
    repo: &dyn Repository,
    policy: &PolicyConfig,
    case: &EscalationCase,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    match case.current_tier {
        CaseTier::Tier1Gentle => {
            scheduler::admit(
                repo,
                &policy.rate,
                NotificationDraft {
                    user_id: case.user_id,
                    case_id: Some(case.id),
                    destination: Destination::User,
                    delivery_method: DeliveryMethod::Push,
                    content: TIER1_CONTENT.to_string(),
                    priority: case_priority(case),
                    requires_immediate: case.immediate,
                    not_before: None,
                },
                now,
            )
            .await?;
        }
        CaseTier::Tier2Urgent => {
            scheduler::admit(
                repo,
                &policy.rate,
                NotificationDraft {
                    user_id: case.user_id,
                    case_id: Some(case.id),
                    destination: Destination::User,
                    delivery_method: DeliveryMethod::Push,
                    content: TIER2_CONTENT.to_string(),
                    priority: case_priority(case),
                    requires_immediate: case.immediate,
                    not_before: None,
                },
                now,
            )
            .await?;
        }
        CaseTier::Tier3ContactAlert => {
            let contacts = repo.contacts_for_user(case.user_id).await?;
            if contacts.is_empty() {
                warn!(
                    "Case {} reached contact alert but user {} has no emergency contacts",
                    case.id, case.user_id
                );
            }
            for contact in contacts.iter().take(2) {
                scheduler::admit(
                    repo,
                    &policy.rate,
                    NotificationDraft {
                        user_id: case.user_id,
                        case_id: Some(case.id),
                        destination: Destination::Contact {
                            name: contact.name.clone(),
                            address: contact.address.clone(),
                        },
                        delivery_method: contact.method,
                        content: CONTACT_ALERT_CONTENT.to_string(),
                        priority: NotificationPriority::Emergency,
                        requires_immediate: true,
                        not_before: None,
                    },
                    now,
                )
                .await?;
            }
        }
        _ => {}
    }

    if let Some(deadline) = tier_deadline(case, policy) {
        scheduler::schedule_tier_check(repo, case, deadline, now).await?;
    }
    Ok(())
}
