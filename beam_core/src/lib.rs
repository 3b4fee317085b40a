pub mod auth;
pub mod client;
pub mod config;
pub mod connections;
pub mod error;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod relay;
pub mod server;
pub mod session;

pub use config::RelayConfig;
pub use error::RelayError;
pub use messages::{ClientMessage, PeerSummary, ServerMessage};
pub use registry::{DepartReason, Registry, RegistryEvent};
pub use session::{ClientId, ConnHandle, SessionId};

/// WebSocket close code sent when the bearer credential is missing or invalid.
pub const AUTH_FAILURE_CLOSE_CODE: u16 = 4001;
