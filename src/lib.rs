//! Transition-test execution engine.
//!
//! Drives a scripted device transition through setup, repeated execution
//! and teardown, captures window-manager and layer traces around it, and
//! hands the captured evidence to assertions as a [`result::ResultSet`].

pub mod artifact;
pub mod command;
pub mod config;
pub mod device;
pub mod errors;
pub mod logging;
pub mod monitor;
pub mod result;
pub mod rules;
pub mod runner;
pub mod status;
pub mod subject;

#[cfg(test)]
pub(crate) mod testing;
