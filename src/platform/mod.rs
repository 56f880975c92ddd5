// src/platform/mod.rs

//! Selects the `TcpClient` implementation for the platform the host runs on.

mod web;

pub use web::WebClient;

use crate::config::EngineConfig;
use crate::core::{Engine, TcpClient};
use std::fmt;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    /// Any target with an operating-system socket API.
    Native,
    /// A browser sandbox, which cannot open raw TCP sockets.
    Web,
}

impl Platform {
    /// The platform of a build of this crate, which always has a socket API.
    /// Hosts without one select `Web` explicitly when calling `create_client`.
    pub fn current() -> Self {
        Platform::Native
    }

    /// Whether the platform can open TCP sockets. Only `Native` can.
    pub fn supports_tcp(self) -> bool {
        matches!(self, Platform::Native)
    }

    /// The lowercase platform name, as shown by `Display`.
    pub fn as_str(self) -> &'static str {
        match self {
            Platform::Native => "native",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the client for `platform`. The native engine spawns its dispatcher,
/// so this must be called from within a Tokio runtime.
pub fn create_client(platform: Platform, config: EngineConfig) -> Box<dyn TcpClient> {
    debug!("Creating TCP client for the {} platform.", platform);
    if platform.supports_tcp() {
        Box::new(Engine::new(config))
    } else {
        Box::new(WebClient::new())
    }
}
