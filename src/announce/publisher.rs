//! Outbound delivery of announcements to the chat connectors

use crate::announce::text::PlatformText;
use crate::error::{PickupError, Result};
use crate::types::{Platform, PlayerIdentity};
use async_trait::async_trait;
use std::sync::Mutex;
use tracing::info;

/// Trait for handing rendered text to the chat platform connectors
#[async_trait]
pub trait ChatPublisher: Send + Sync {
    /// Send a message to every bridged channel
    async fn broadcast(&self, text: &PlatformText) -> Result<()>;

    /// Send a private notice to one player
    async fn notify(&self, player: &PlayerIdentity, text: &str) -> Result<()>;

    /// Replace the channel topic with the pickup text
    async fn set_topic(&self, text: &str) -> Result<()>;

    /// Broadcast the same text on every platform
    async fn broadcast_text(&self, text: &str) -> Result<()> {
        self.broadcast(&PlatformText::same(text)).await
    }
}

/// Publisher that only writes announcements to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogPublisher;

#[async_trait]
impl ChatPublisher for LogPublisher {
    async fn broadcast(&self, text: &PlatformText) -> Result<()> {
        info!(target: "pickup_room::announce", "[broadcast] {}", text.irc);
        Ok(())
    }

    async fn notify(&self, player: &PlayerIdentity, text: &str) -> Result<()> {
        info!(
            target: "pickup_room::announce",
            "[notice -> {}@{}] {}", player.handle, player.platform, text
        );
        Ok(())
    }

    async fn set_topic(&self, text: &str) -> Result<()> {
        info!(target: "pickup_room::announce", "[topic] {}", text);
        Ok(())
    }
}

/// Publisher printing to stdout for the interactive console
#[derive(Debug, Clone, Copy)]
pub struct ConsolePublisher {
    platform: Platform,
}

impl ConsolePublisher {
    pub fn new(platform: Platform) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl ChatPublisher for ConsolePublisher {
    async fn broadcast(&self, text: &PlatformText) -> Result<()> {
        for line in text.get(self.platform).lines() {
            println!("<pickup> {}", line);
        }
        Ok(())
    }

    async fn notify(&self, player: &PlayerIdentity, text: &str) -> Result<()> {
        println!("-pickup- [{}] {}", player.handle, text);
        Ok(())
    }

    async fn set_topic(&self, text: &str) -> Result<()> {
        println!("*** topic: {}", text);
        Ok(())
    }
}

/// Delivery recorded by `MockPublisher`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishedEvent {
    Broadcast(PlatformText),
    Notice { to: PlayerIdentity, text: String },
    Topic(String),
}

/// Mock publisher for testing
#[derive(Debug, Default)]
pub struct MockPublisher {
    events: Mutex<Vec<PublishedEvent>>,
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// All recorded deliveries in order
    pub fn events(&self) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Notices delivered to `player`
    pub fn notices_to(&self, player: &PlayerIdentity) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PublishedEvent::Notice { to, text } if &to == player => Some(text),
                _ => None,
            })
            .collect()
    }

    /// Broadcast texts as seen on IRC
    pub fn broadcasts(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                PublishedEvent::Broadcast(text) => Some(text.irc),
                _ => None,
            })
            .collect()
    }

    pub fn last_topic(&self) -> Option<String> {
        self.events().into_iter().rev().find_map(|event| match event {
            PublishedEvent::Topic(text) => Some(text),
            _ => None,
        })
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn record(&self, event: PublishedEvent) -> Result<()> {
        let mut events = self
            .events
            .lock()
            .map_err(|_| PickupError::lock_poisoned("published events"))?;
        events.push(event);
        Ok(())
    }
}

#[async_trait]
impl ChatPublisher for MockPublisher {
    async fn broadcast(&self, text: &PlatformText) -> Result<()> {
        self.record(PublishedEvent::Broadcast(text.clone()))
    }

    async fn notify(&self, player: &PlayerIdentity, text: &str) -> Result<()> {
        self.record(PublishedEvent::Notice {
            to: player.clone(),
            text: text.to_string(),
        })
    }

    async fn set_topic(&self, text: &str) -> Result<()> {
        self.record(PublishedEvent::Topic(text.to_string()))
    }
}
