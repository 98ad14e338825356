//! Massive market-data WebSocket connector.
//!
//! The feed pushes heterogeneous JSON frames over a single socket: status
//! messages for the connection/auth lifecycle and aggregate events for
//! subscribed symbols. This module exposes a typed message enum with an
//! open fallback variant, a stateless frame parser, and a reconnecting
//! client that forwards messages into an mpsc channel and reports fatal
//! conditions (failed auth) on a dedicated error channel.

pub mod parser;
pub mod types;
pub mod ws;

pub use types::{Feed, FeedMessage, Market, Topic};
pub use ws::{MassiveConfig, MassiveWsClient};
