//! Vendhub Billing Engine
//!
//! Tracks a customer's subscription through trial, activation, renewal,
//! payment failure, and termination, and translates that state into the
//! entitlements other modules gate behavior on. Money reconciles
//! (gross = platform fee + vendor amount), entitlements never drift from
//! paid status, and credential-gated capabilities react to verification
//! events as they arrive.
//!
//! External collaborators (payment rails, the credential pipeline, the
//! event bus, and persistence) are consumed through the boundary traits in
//! [`gateway`], [`events`], and [`store`]; [`memory`] ships in-process
//! implementations for tests and embedding.

pub mod analytics;
pub mod catalog;
pub mod config;
pub mod dunning;
pub mod engine;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod gateway;
pub mod invoice;
pub mod lifecycle;
pub mod locks;
pub mod memory;
pub mod period;
pub mod pricing;
pub mod proration;
pub mod revenue;
pub mod store;
pub mod subscription;

pub use analytics::AnalyticsSnapshot;
pub use catalog::{BillingType, EntitlementDefinition, EntitlementType, Plan, TrialConfig, TrialIntent};
pub use config::EngineConfig;
pub use dunning::{DunningConfig, DunningStatus};
pub use engine::BillingEngine;
pub use entitlement::{EntitlementCheck, GrantOutcome, GrantedEntitlement};
pub use error::{BillingError, BillingResult};
pub use events::{DomainEvent, EventEnvelope, EventPublisher};
pub use gateway::{ChargeOutcome, CredentialVerifier, PaymentGateway};
pub use invoice::{Invoice, InvoiceStatus, LineItem, PaymentTerms};
pub use lifecycle::{ChangeOptions, NewSubscription};
pub use period::BillingInterval;
pub use pricing::{PricingModel, VolumeDiscount};
pub use proration::ProrationBehavior;
pub use revenue::{RevenueShare, SettlementSource};
pub use subscription::{Subscription, SubscriptionStatus};
