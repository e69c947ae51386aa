//! Core engine for a real-time Arabic word-race party game.
//!
//! One player hosts a room; everyone publishes intents on a shared actions
//! topic and mirrors the canonical state the host publishes back. Rounds are
//! scored by an external LLM judge, with deterministic local point rules.

pub mod identity;
pub mod oracle;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod types;

pub use service::{GameService, ServiceError};
