//! Application state

use std::sync::Arc;

use sqlx::PgPool;

use budgetly_billing::BillingService;

/// Shared application state.
///
/// The billing service is constructed exactly once at startup from
/// configuration and passed in; handlers never reach for a global.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub billing: Arc<BillingService>,
}

impl AppState {
    pub fn new(pool: PgPool, billing: BillingService) -> Self {
        Self {
            pool,
            billing: Arc::new(billing),
        }
    }
}
