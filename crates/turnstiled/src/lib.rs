//! turnstiled — geofenced face-verification attendance daemon.
//!
//! Fuses two independent signals into one admit/deny decision: facial
//! similarity against enrolled templates, and containment of the reported
//! location fix within an authorized site. The fusion is a strict AND.

pub mod attendance;
pub mod config;
pub mod db;
pub mod engine;
pub mod http;
pub mod sites;

pub use config::Config;
pub use http::{build_router, AppState};
