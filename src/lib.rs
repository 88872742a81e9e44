//! gridlot — a spatial grid-canvas ad marketplace core.
//!
//! Advertisers reserve rectangular regions on a shared pixel canvas, attach
//! image content with a destination link, and go live once the content
//! clears moderation. The crate is organised as:
//!
//! - [`grid`] — rectangle validation, availability, zone pricing, and atomic
//!   reservation over the canvas
//! - [`submission`] — content intake: credential-gated upload, versioned
//!   submissions, and decision application
//! - [`moderation`] — the checker set and the pipeline aggregating their
//!   verdicts into a decision
//! - [`bans`] — append-only ban registry for domains, content hashes, and
//!   keywords
//! - [`lifecycle`] — audited administrative transitions over region status
//! - [`payments`] — settlement and refunds tied to region status
//! - [`store`] — SQLite persistence with a single-writer actor for all
//!   mutations
//! - [`objstore`] — filesystem storage for image payloads
//! - [`config`] / [`logging`] — runtime configuration and tracing setup

pub mod bans;
pub mod config;
pub mod grid;
pub mod lifecycle;
pub mod logging;
pub mod moderation;
pub mod objstore;
pub mod payments;
pub mod store;
pub mod submission;
