// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;
pub mod platform;

// Re-export
pub use crate::core::{
    ConnectResult, ConnectionInfo, DataEvent, Engine, EngineError, Event, EventListener,
    ListenerHandle, SendResult, StateEvent, TcpClient,
};
pub use crate::platform::{Platform, create_client};
