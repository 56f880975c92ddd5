// src/core/mod.rs

//! The engine: connection registry, send scheduling, event dispatch and the
//! facade that ties them together.

pub mod client;
pub mod engine;
pub mod errors;
pub mod events;
pub mod metrics;
pub mod registry;
pub mod scheduler;

pub use client::{ConnectResult, ConnectionInfo, SendResult, TcpClient};
pub use engine::Engine;
pub use errors::EngineError;
pub use events::{DataEvent, Event, EventListener, ListenerHandle, StateEvent};
