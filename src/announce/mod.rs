//! Announcements: text rendering and delivery to chat connectors

pub mod publisher;
pub mod text;

pub use publisher::{ChatPublisher, ConsolePublisher, LogPublisher, MockPublisher, PublishedEvent};
pub use text::{Announcer, PlatformText, PICKUP_TEXT_PREFIX};
