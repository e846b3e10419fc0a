//! Conductor Core
//!
//! Core domain types, traits, and error handling for Conductor. This
//! crate has minimal dependencies and defines the shared vocabulary used
//! across all other crates: agents, runs, the wire protocol, and the
//! repository ports that adapter crates implement.

pub mod agent;
pub mod error;
pub mod ids;
pub mod ports;
pub mod protocol;
pub mod run;

pub use error::{Error, Result};
pub use ids::*;
