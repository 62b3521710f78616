//! Print Farm Dashboard
//!
//! Live status and remote control for a fleet of 3D printers (Klipper via
//! Moonraker, and OctoPrint) reached through a Home Assistant gateway.
//!
//! This library provides:
//! - Printer registry and periodic status polling
//! - Card rendering for each printer
//! - Control dispatch, routed through the gateway or straight to Moonraker
//! - Modals, notifications, camera snapshots and G-code file management
//! - Server-Sent Events and a Pico CSS web UI

pub mod api;
pub mod app;
pub mod bus;
pub mod camera;
pub mod config;
pub mod dispatch;
pub mod files;
pub mod gateway;
pub mod modal;
pub mod model;
pub mod notify;
pub mod poller;
pub mod registry;
pub mod render;
pub mod ui;
