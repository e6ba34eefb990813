//! MQTT relay daemon library
//!
//! This module re-exports the daemon's modules for the binary and for
//! integration testing.

pub mod config;
pub mod producer;
pub mod shutdown;
pub mod upstream;
