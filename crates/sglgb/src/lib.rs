//! Core of the Seal of Good Local Governance for Barangays (SGLGB) assessment service.

pub mod assessment;
pub mod config;
pub mod error;
pub mod telemetry;
