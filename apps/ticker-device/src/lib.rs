//! Device endpoint for the ticker web UI.
//!
//! Serves the page model to every connected browser over a WebSocket
//! listener, keeps settings groups and local messages on disk, rotates
//! messages onto the scrolling monitor and exposes a small file manager
//! over HTTP.

pub mod config;
pub mod device;
pub mod error;
pub mod fsm;
pub mod handlers;
pub mod hub;
pub mod invocations;
pub mod local_messages;
pub mod pages;
pub mod rotation;
pub mod server;
pub mod settings_store;
pub mod spa;
pub mod telemetry;

pub use config::DeviceConfig;
pub use device::Device;
pub use server::{bind, serve, Listeners};
pub use telemetry::Telemetry;
