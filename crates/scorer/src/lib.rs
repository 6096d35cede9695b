//! Spot scorer service wiring
//!
//! The binary runs scoring passes over the configured data directory and
//! serves health and metrics endpoints in between.

pub mod api;
pub mod config;
