//! Still controller core library.
//!
//! Exposes the pure-logic modules for integration testing and external
//! inspection.  ESP-IDF-specific code is guarded by
//! `#[cfg(target_os = "espidf")]` within each module; everything else
//! runs and tests on the host.

#![deny(unused_must_use)]

pub mod actuators;
pub mod adapters;
pub mod app;
pub mod drivers;
pub mod error;
pub mod process;
pub mod safety;
pub mod sensors;
pub mod settings;
