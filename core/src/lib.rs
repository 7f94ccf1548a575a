//! IRC relay gateway core
//!
//! Links channels across IRC networks that speak different dialects: server
//! to server links (RFC 1459, TS), plain client connections and bot
//! multiplexers. Everything that happens on one side of a channel bridge is
//! translated for the other side.

pub mod bot;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod directory;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod identity;
pub mod info;
pub mod link;
pub mod message;
pub mod modes;
pub mod numeric;
pub mod relay;

pub use buffer::RecvQueue;
pub use config::{ChannelConfig, ChannelLinkConfig, Config, GatewayConfig, LinkConfig};
pub use connection::Relay;
pub use directory::{Channel, ChannelId, ChannelUser, Directory, LinkId, User, UserId};
pub use error::{Error, Result};
pub use gateway::{ConnectRequest, Gateway};
pub use link::{Dialect, Link, LinkState, Outbound};
pub use message::{Message, Prefix};
pub use numeric::NumericReply;

/// Re-exports for convenience
pub use tracing::{debug, error, info, warn};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
