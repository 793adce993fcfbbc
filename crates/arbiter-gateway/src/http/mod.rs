pub mod auth;
pub mod chat;
pub mod conversations;
pub mod health;
