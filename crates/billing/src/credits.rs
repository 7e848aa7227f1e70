//! Credit catalog and ledger vocabulary
//!
//! Credits are consumable units gating metered feature usage, replenished by
//! subscription grant or one-time pack purchase. Balances are always the
//! running sum of append-only ledger entries.

use crate::error::{BillingError, BillingResult};

/// Monthly credit allotment granted when a pro subscription is created, and
/// recorded as the recurring grant rate for the monthly refresh job.
pub const PRO_MONTHLY_CREDITS: i64 = 100;

/// Why a ledger entry exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreditReason {
    SubscriptionGrant,
    Purchase,
    Debit,
}

impl CreditReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditReason::SubscriptionGrant => "subscription_grant",
            CreditReason::Purchase => "purchase",
            CreditReason::Debit => "debit",
        }
    }
}

impl std::fmt::Display for CreditReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fixed catalog of purchasable credit packs.
///
/// Lookup is exact: case variants and malformed identifiers are not-found.
/// An unrecognized pack must fail loudly, never default to zero or to the
/// nearest pack.
pub fn pack_credits(pack_id: &str) -> Option<i64> {
    match pack_id {
        "pack_25" => Some(25),
        "pack_75" => Some(75),
        "pack_200" => Some(200),
        _ => None,
    }
}

/// Resolve a pack or fail with `UnknownCreditPack`.
pub fn require_pack_credits(pack_id: &str) -> BillingResult<i64> {
    pack_credits(pack_id).ok_or_else(|| BillingError::UnknownCreditPack(pack_id.to_string()))
}
