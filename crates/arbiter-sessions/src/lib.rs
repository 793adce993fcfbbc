//! Opaque server-held sessions.
//!
//! A session is a random 256-bit token keyed in the KV store under
//! `sess:<token>`, holding the principal blob `{user_id, email, tier}`.
//! The token travels in an HttpOnly cookie; nothing about the user is
//! client-readable. Sessions are multi-device: each login mints a fresh
//! token and `logout` destroys only the presented one.

pub mod cookie;
pub mod manager;

pub use manager::SessionManager;
