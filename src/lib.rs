//! Pickup Room - Pickup-game matchmaking for bridged game-community chats
//!
//! This crate provides per-gametype queues with automatic match formation,
//! reservation expiry, subscriptions and promotions, driven by chat commands
//! arriving from IRC, Discord and Matrix.

pub mod announce;
pub mod command;
pub mod config;
pub mod error;
pub mod expiry;
pub mod identity;
pub mod metrics;
pub mod pickup;
pub mod service;
pub mod storage;
pub mod subscription;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{PickupError, Result};
pub use types::*;

// Re-export key components
pub use announce::{Announcer, ChatPublisher};
pub use command::CommandDispatcher;
pub use expiry::{ExpiryPolicy, ExpiryScheduler};
pub use pickup::{PickupManager, PickupOptions};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
