//! Thermal management for Legion laptops: a serialized embedded-controller
//! transport, a rolling sensor history, trend prediction, and a policy that
//! turns the forecast into power limits and fan curves.

pub mod config;
pub mod ec;
pub mod http;
pub mod kernel;
pub mod optimizer;
pub mod policy;
pub mod predict;
pub mod telemetry;
pub mod workload;
