//! Subscriptions and promotion
//!
//! Players subscribe to gametypes they want to be pinged about; promotion
//! picks the subscribed, online players that are not already queued.

pub mod promotion;
pub mod registry;

pub use promotion::{build_promotion, promotion_text, EveryoneOnline, Presence};
pub use registry::{Subscription, SubscriptionRegistry};
