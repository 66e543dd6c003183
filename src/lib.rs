//! Alert Trader - chat-signal driven order pipeline
//!
//! This library provides the pieces of a pipeline that listens to a chat
//! gateway, extracts trading alerts from messages, applies risk checks and
//! places orders through a pluggable execution backend.

pub mod bus;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod exchange;
pub mod gateway;
pub mod ingest;
pub mod parser;
pub mod resilience;
pub mod runtime;
pub mod services;

// Re-export commonly used types
pub use bus::EventBus;
pub use config::AppConfig;
pub use events::{Alert, Direction, OrderRequest, OrderResult, RawEvent, RiskDecision};
pub use services::Orchestrator;

#[cfg(test)]
mod bus_tests;
