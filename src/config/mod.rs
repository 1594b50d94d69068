//! # Configuration
//!
//! Controller settings, read once from the environment at startup.

pub mod controller;

pub use controller::{ControllerConfig, LogFormat};
