//! # Drover Orchestrator
//!
//! `droverd` accepts script execution requests over HTTP, runs each script on
//! its own task, and drives the addressed device through MQTT commands:
//!
//! ```text
//! HTTP → engine → script task → facade → broker → device agent
//!                     ▲                              │
//!                     └── correlator ◀── wildcard ◀──┘
//! ```
//!
//! - [`engine`]: execution lifecycle state machine, response routing,
//!   cancellation, history
//! - [`correlator`]: command-id → waiter map with per-command deadlines
//! - [`facade`]: per-execution device client turning async pub/sub into
//!   synchronous primitive calls
//! - [`catalog`] / [`scripts`]: the registered script set
//! - [`persistence`]: terminal records on disk, retention sweep
//! - [`http`]: thin axum adapter over the engine's public operations

pub mod catalog;
pub mod context;
pub mod correlator;
pub mod engine;
pub mod error;
pub mod facade;
pub mod http;
pub mod persistence;
pub mod scripts;
