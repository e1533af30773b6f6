//! Engine configuration
//!
//! One explicit struct passed at construction. The engine reads nothing
//! from the environment and keeps no global registries.

use serde::{Deserialize, Serialize};

use crate::dunning::DunningConfig;
use crate::invoice::PaymentTerms;
use crate::proration::ProrationBehavior;

/// Retry policy for transient gateway / credential-lookup failures
///
/// Retries run outside the per-subscription lock; the lock is re-acquired
/// only to commit the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

/// Engine-wide configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// ISO 4217 currency charged through the gateway
    pub currency: String,
    /// Flat tax rate applied to invoice subtotals, percent
    pub tax_percent: f64,
    pub dunning: DunningConfig,
    pub proration: ProrationBehavior,
    /// Terms stamped on invoices the engine creates
    pub invoice_terms: PaymentTerms,
    pub gateway_retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            tax_percent: 0.0,
            dunning: DunningConfig::default(),
            proration: ProrationBehavior::ImmediateProrate,
            invoice_terms: PaymentTerms::NetDays(30),
            gateway_retry: RetryConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.currency, "USD");
        assert_eq!(config.dunning.max_retry_attempts, 4);
        assert_eq!(config.proration, ProrationBehavior::ImmediateProrate);
        assert_eq!(config.invoice_terms, PaymentTerms::NetDays(30));
    }
}
