//! Tier resolution
//!
//! Effective access tier is recomputed from subscription state at read time,
//! never stored as ground truth. Callers persist the result into the
//! user-settings projection whenever a subscription event is processed.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::events::SubscriptionStatus;

/// Effective access level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Pro => "pro",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pure tier computation. Side-effect-free; callable at any time.
///
/// - `active` / `trialing`: pro, unconditionally.
/// - `cancelled` / `past_due` / `paused`: pro only while the paid period is
///   still running, i.e. `period_end > now` (strict — a period ending at
///   exactly `now` grants free).
/// - `expired`: free, unconditionally.
pub fn resolve_tier(
    status: SubscriptionStatus,
    period_end: Option<OffsetDateTime>,
    now: OffsetDateTime,
) -> Tier {
    match status {
        SubscriptionStatus::Active | SubscriptionStatus::Trialing => Tier::Pro,
        SubscriptionStatus::Cancelled
        | SubscriptionStatus::PastDue
        | SubscriptionStatus::Paused => match period_end {
            Some(end) if end > now => Tier::Pro,
            _ => Tier::Free,
        },
        SubscriptionStatus::Expired => Tier::Free,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    fn now() -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap()
    }

    #[test]
    fn active_and_trialing_are_always_pro() {
        let now = now();
        let far_past = Some(now - Duration::days(400));
        assert_eq!(resolve_tier(SubscriptionStatus::Active, far_past, now), Tier::Pro);
        assert_eq!(resolve_tier(SubscriptionStatus::Active, None, now), Tier::Pro);
        assert_eq!(resolve_tier(SubscriptionStatus::Trialing, far_past, now), Tier::Pro);
    }

    #[test]
    fn cancelled_keeps_pro_until_period_end() {
        let now = now();
        assert_eq!(
            resolve_tier(SubscriptionStatus::Cancelled, Some(now + Duration::days(1)), now),
            Tier::Pro
        );
        assert_eq!(
            resolve_tier(SubscriptionStatus::Cancelled, Some(now - Duration::days(1)), now),
            Tier::Free
        );
    }

    #[test]
    fn period_end_boundary_is_strict() {
        let now = now();
        // period_end == now grants free: the comparison is strictly greater-than
        assert_eq!(
            resolve_tier(SubscriptionStatus::Cancelled, Some(now), now),
            Tier::Free
        );
        assert_eq!(
            resolve_tier(SubscriptionStatus::Cancelled, Some(now + Duration::milliseconds(1)), now),
            Tier::Pro
        );
    }

    #[test]
    fn past_due_and_paused_follow_the_period_grace() {
        let now = now();
        let future = Some(now + Duration::days(10));
        let past = Some(now - Duration::days(10));
        assert_eq!(resolve_tier(SubscriptionStatus::PastDue, future, now), Tier::Pro);
        assert_eq!(resolve_tier(SubscriptionStatus::PastDue, past, now), Tier::Free);
        assert_eq!(resolve_tier(SubscriptionStatus::Paused, future, now), Tier::Pro);
        assert_eq!(resolve_tier(SubscriptionStatus::Paused, past, now), Tier::Free);
        // No recorded period end means no grace
        assert_eq!(resolve_tier(SubscriptionStatus::PastDue, None, now), Tier::Free);
    }

    #[test]
    fn expired_is_free_even_with_future_period() {
        let now = now();
        assert_eq!(
            resolve_tier(SubscriptionStatus::Expired, Some(now + Duration::days(365)), now),
            Tier::Free
        );
    }
}
