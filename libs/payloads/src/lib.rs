//! # drover-payloads
//!
//! Payload definitions exchanged between the controller and node launchers.
//!
//! ## Design Principles
//!
//! - Payloads are YAML documents; the wire format is the YAML text itself,
//!   so encoding is deterministic (fixed field order per payload)
//! - Command payloads carry exactly one top-level key naming the command
//! - Decoding is strict: unknown keys and missing fields are errors that
//!   name the offending key
//! - Every command kind owns a closed failure taxonomy; a failure payload
//!   for one command can never carry another command's reason
//!
//! ## Commands
//!
//! ```yaml
//! stop:
//!   instance_uuid: 3390740c-dce9-48d6-b83a-a717417072ce
//!   workload_agent_uuid: 59460b8a-5f53-4e3e-b5ce-b71fed8c7e64
//! ```
//!
//! ## Failures
//!
//! ```yaml
//! instance_uuid: 2400bce6-ccc8-4a45-b2aa-b5cc3790077b
//! reason: already_running
//! ```

mod codec;
mod command;
mod error;
mod failure;

pub use codec::*;
pub use command::*;
pub use error::{DecodeError, EncodeError};
pub use failure::*;
