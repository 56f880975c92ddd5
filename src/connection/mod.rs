// src/connection/mod.rs

//! Manages the lifecycle of a single outbound TCP connection: its state
//! machine, its receive loop, and the guard that tears it down.

mod guard;
mod reader;
mod session;
mod state;

pub use session::Connection;
pub use state::{CloseCause, ConnectionState};

pub(crate) use reader::{ReceiveOptions, run_receive_loop};
