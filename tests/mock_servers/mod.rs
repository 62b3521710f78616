//! Mock servers for integration testing
//!
//! Simulates the Home Assistant print gateway so the dashboard can be
//! exercised end to end over real HTTP.

pub mod gateway;

pub use gateway::{MockGateway, RecordedRequest};
