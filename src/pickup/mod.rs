//! Pickup queues and matchmaking
//!
//! Gametype registry, per-gametype queues, team assignment and the
//! `PickupManager` tying them together.

pub mod manager;
pub mod queue;
pub mod registry;
pub mod teams;

pub use manager::{PartialStartPolicy, PickupManager, PickupOptions, PickupStats};
pub use queue::GametypeQueue;
pub use registry::{GametypeRegistry, SharedQueue};
pub use teams::{form_match, CaptainPolicy, RoundRobinAssigner, TeamAssigner, TeamAssignment};
