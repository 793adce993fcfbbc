//! Shared foundation for the Arbiter gateway: configuration, the
//! cross-component error taxonomy, and the tier/principal types every
//! subsystem speaks.

pub mod config;
pub mod error;
pub mod types;

pub use error::{ErrorKind, FieldError, GatewayError, RateScope, Result};
pub use types::{Principal, Tier, TierLimits, TierTable};
