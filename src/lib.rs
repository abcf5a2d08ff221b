//! Water-quality telemetry agent.
//!
//! Keeps a station radio associated, polls the water sensors on a fixed
//! cadence and synchronises readings and the onboard indicator with a cloud
//! device shadow.

pub mod agent;
pub mod config;
pub mod error;
pub mod hal;
pub mod instance_lock;
pub mod network;
pub mod sensors;
pub mod shadow;
