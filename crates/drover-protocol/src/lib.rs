//! # Drover Protocol Library
//!
//! This crate defines the message contracts and lifecycle records shared by
//! the drover orchestrator (`droverd`) and the on-device agent
//! (`drover-agent`):
//!
//! - **Commands**: low-level device operations (tap, input, screenshot,
//!   shell, text search) published to a device's command topic
//! - **Responses**: per-command results published back by the agent
//! - **Text positions**: screen rectangles with text, confidence and source
//! - **Executions**: the lifecycle record of one script run, from submission
//!   to its terminal state
//! - **Topics**: typed builders for the per-device MQTT topic namespace
//!
//! All payloads are JSON. Unknown fields are ignored on decode so agents and
//! servers can roll forward independently.

pub mod command;
pub mod execution;
pub mod response;
pub mod topics;

pub use command::{Command, CommandType};
pub use execution::{
    Coordinate, ExecutionStatus, ScriptExecution, ScriptRequest, ScriptResponse, ScriptResult,
};
pub use response::{Response, ResponseStatus, TextPosition};
