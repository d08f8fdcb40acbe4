//! widget-host library: exposes the host components for testing.
//!
//! A thin layer over widget-core that routes comm frames between a front end
//! and the widgets it owns.

pub mod config;
pub mod host;
pub mod router;

pub use config::HostConfig;
pub use host::run;
pub use router::{CommRouter, RouterError};
