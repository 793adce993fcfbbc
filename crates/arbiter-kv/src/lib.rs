//! Atomic-increment/TTL key-value adapter.
//!
//! Backs the rate-limit counters (`rl_ip:*`, `rl_anon:*`, `rl_user_*`),
//! session blobs (`sess:*`), and the daily budget-alert flags
//! (`budget_alert_*`). Every operation is a single atomic step against one
//! key — callers never need multi-key transactions.
//!
//! The backing store is in-process (`DashMap`): the gateway targets
//! single-node deployment, and all callers go through this adapter, so a
//! networked store can be slotted in behind the same surface.

mod error;
mod store;

pub use error::{KvError, Result};
pub use store::KvStore;
