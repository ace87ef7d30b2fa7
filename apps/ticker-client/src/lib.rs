//! Headless client for the ticker web UI sync protocol.
//!
//! Keeps one WebSocket link to the device alive, reconciles the page model
//! from the frames it pushes and sends user actions back.

pub mod client;
pub mod config;
pub mod connection;
pub mod emitter;
pub mod fsm;
pub mod invoke;
pub mod markup;
pub mod monitor;
pub mod popup;
pub mod router;
pub mod session;
pub mod status;
pub mod ticker;
pub mod timer;
pub mod ui;

pub use client::{start, ClientRuntime};
pub use config::ClientConfig;
pub use connection::{ChannelError, ChannelHandle, ConnectionState, Dialer, Link, WsDialer};
pub use session::{SessionHandle, SessionView, UserAction};
