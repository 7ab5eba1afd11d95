//! # drover-id
//!
//! Typed identifiers for the resources a drover launcher deals with.
//!
//! ## Design Principles
//!
//! - Every identifier is a 128-bit UUID assigned by the controller
//! - The canonical textual form is lowercase and hyphenated
//!   (`3390740c-dce9-48d6-b83a-a717417072ce`), and parsing is strict
//! - Identifiers roundtrip through their textual form (parse → format → parse)
//! - Identifiers are typed so an instance UUID can never be passed where an
//!   agent UUID is expected

mod error;
mod macros;
mod types;

pub use error::IdError;
pub use types::*;

/// Re-export uuid for consumers that need raw UUID operations
pub use uuid::Uuid;
