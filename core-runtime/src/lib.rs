//! # Core Runtime Module
//!
//! Runtime infrastructure shared by the library engine crates:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! Every other core crate logs through `tracing`, reports state changes on the
//! [`EventBus`](events::EventBus) and is wired from a single
//! [`CoreConfig`](config::CoreConfig) built here.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use error::{Error, Result};
