//! Shared primitives for Ecclesia's subsystems.
//!
//! Storage access, the error taxonomy, ids and timestamps, configuration
//! and logging live here. Subsystems in [`crate::plugins`] build on these.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod schemas;
pub mod store;
pub mod time;
