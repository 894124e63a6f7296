//! Legal tier transitions for escalation cases.

use crate::models::case::CaseTier;

/// Transition table. Tiers only move forward; `Resolved` is reachable from
/// any open tier (the "I am safe" short-circuit), `Expired` only after the
/// contact-alert grace window runs out. The single permitted skip is the
/// critical/immediate bypass straight from `Idle` to `Tier2Urgent`.
pub fn is_legal_transition(from: CaseTier, to: CaseTier) -> bool {
    use CaseTier::*;
    matches!(
        (from, to),
        (Idle, Tier1Gentle)
            | (Idle, Tier2Urgent)
            | (Tier1Gentle, Tier2Urgent)
            | (Tier2Urgent, Tier3ContactAlert)
            | (Tier3ContactAlert, Expired)
            | (Idle, Resolved)
            | (Tier1Gentle, Resolved)
            | (Tier2Urgent, Resolved)
            | (Tier3ContactAlert, Resolved)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use CaseTier::*;

    #[test]
    fn test_forward_ladder_is_legal() {
        assert!(is_legal_transition(Idle, Tier1Gentle));
        assert!(is_legal_transition(Tier1Gentle, Tier2Urgent));
        assert!(is_legal_transition(Tier2Urgent, Tier3ContactAlert));
        assert!(is_legal_transition(Tier3ContactAlert, Expired));
    }

    #[test]
    fn test_critical_bypass_is_legal() {
        assert!(is_legal_transition(Idle, Tier2Urgent));
        // The bypass is the only skip; nothing else may jump a tier.
        assert!(!is_legal_transition(Idle, Tier3ContactAlert));
        assert!(!is_legal_transition(Tier1Gentle, Tier3ContactAlert));
    }

    #[test]
    fn test_resolve_short_circuits_from_any_open_tier() {
        for from in [Idle, Tier1Gentle, Tier2Urgent, Tier3ContactAlert] {
            assert!(is_legal_transition(from, Resolved));
        }
    }

    #[test]
    fn test_no_backwards_or_terminal_transitions() {
        assert!(!is_legal_transition(Tier2Urgent, Tier1Gentle));
        assert!(!is_legal_transition(Tier3ContactAlert, Tier2Urgent));
        assert!(!is_legal_transition(Resolved, Tier1Gentle));
        assert!(!is_legal_transition(Expired, Tier1Gentle));
        assert!(!is_legal_transition(Resolved, Expired));
        // Expiry without the contact-alert stage is not a thing.
        assert!(!is_legal_transition(Tier1Gentle, Expired));
        assert!(!is_legal_transition(Tier2Urgent, Expired));
    }
}
