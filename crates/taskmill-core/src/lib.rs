//! `taskmill-core` — shared configuration and error types for taskmill.
//!
//! Keeps the scheduler crate free of any knowledge about where its knobs
//! come from: the binary loads a [`config::TaskmillConfig`] and hands the
//! relevant pieces to the scheduler as plain values.

pub mod config;
pub mod error;

pub use config::TaskmillConfig;
pub use error::{CoreError, Result};
