//! authgate - credential and session authentication engine.
//!
//! Registers users, verifies email ownership through selector/token pairs,
//! authenticates logins behind a throttle ledger, manages ephemeral and
//! remember-me sessions, and evaluates role-based access. The HTTP layer in
//! [`app`] and [`auth::handlers`] is thin glue over the workflow functions
//! in [`auth::services`]; storage and mail transport sit behind the
//! [`store::AuthStore`] and [`mailer::Mailer`] seams.

pub mod access;
pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod mailer;
pub mod sessions;
pub mod state;
pub mod store;
pub mod throttle;
pub mod tokens;
pub mod users;
