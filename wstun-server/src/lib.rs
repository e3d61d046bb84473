//! wstun server
//!
//! Wires the core relay to a TUN device and an HTTP/WebSocket front end.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        wstun-cli                             │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       wstun-server                           │
//! │  - Config / Paths (TOML, directory layout)                   │
//! │  - HTTP surface (register, config, stats, /ws)               │
//! │  - Server (supervision, shutdown, fatal errors)              │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ┌──────────────────────┐          ┌──────────────────────┐  │
//! │  │     wstun-core       │          │      wstun-tun       │  │
//! │  │  - Allocator/stores  │          │  - TUN device        │  │
//! │  │  - Registry          │          │                      │  │
//! │  │  - Relay / codec     │          │                      │  │
//! │  └──────────────────────┘          └──────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod paths;
pub mod server;
mod ws;

pub use api::{
    router, ApiError, AppState, FatalReceiver, RegisterRequest, RegisterResponse,
    TimestampResponse, TunnelSettings, KEY_HEADER,
};
pub use config::{Config, ServerConfig, MAX_PERIOD_SECS, MIN_TUNNEL_MTU};
pub use error::{Error, Result};
pub use paths::{Paths, ALLOCATOR_FILE_NAME, CONFIG_FILE_NAME};
pub use server::Server;
