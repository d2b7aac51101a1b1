//! Health checks
//!
//! This module provides health check functionality for the pickup-room
//! service, including readiness and liveness probes.

use crate::service::app::ServiceHandle;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// Health check status
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Numeric value exported as the health gauge
    pub fn as_gauge(&self) -> u8 {
        match self {
            HealthStatus::Unhealthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Healthy => 2,
        }
    }

    fn worst(self, other: &HealthStatus) -> HealthStatus {
        match (&self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "✅ healthy"),
            HealthStatus::Degraded => write!(f, "⚠️  degraded"),
            HealthStatus::Unhealthy => write!(f, "❌ unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    /// Service name
    pub service: String,
    pub version: String,
    /// Current timestamp
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    /// Service statistics
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    /// Component name
    pub name: String,
    /// Component status
    pub status: HealthStatus,
    /// Optional error message if unhealthy
    pub message: Option<String>,
    /// Check duration in milliseconds
    pub duration_ms: u64,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub gametypes: usize,
    /// Total players currently waiting
    pub players_waiting: usize,
    pub subscriptions: usize,
    /// Total matches formed since service start
    pub matches_formed: u64,
    /// Total reservations since service start
    pub players_queued: u64,
    pub evictions: u64,
    pub scheduler_armed: bool,
    /// Service uptime information
    pub uptime_info: String,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(service: &ServiceHandle) -> Result<Self> {
        let mut checks = Vec::new();
        let mut overall_status = HealthStatus::Healthy;

        let service_check = Self::check_service_running(service).await;
        overall_status = overall_status.worst(&service_check.status);
        checks.push(service_check);

        let manager_check = Self::check_pickup_manager(service);
        overall_status = overall_status.worst(&manager_check.status);
        checks.push(manager_check);

        let scheduler_check = Self::check_expiry_scheduler(service);
        overall_status = overall_status.worst(&scheduler_check.status);
        checks.push(scheduler_check);

        let stats = Self::gather_service_stats(service);

        Ok(HealthCheck {
            status: overall_status,
            service: service.name().to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(service: &ServiceHandle) -> Result<HealthStatus> {
        if service.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle commands
    pub async fn readiness_check(service: &ServiceHandle) -> Result<HealthStatus> {
        if !service.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_pickup_manager(service).status)
    }

    async fn check_service_running(service: &ServiceHandle) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = if service.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// The manager is healthy when its locks can be taken
    fn check_pickup_manager(service: &ServiceHandle) -> ComponentCheck {
        let start = std::time::Instant::now();

        let (status, message) = match service.manager().stats() {
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => {
                error!("Pickup manager stats check failed: {}", e);
                (
                    HealthStatus::Unhealthy,
                    Some(format!("Stats check failed: {}", e)),
                )
            }
        };

        ComponentCheck {
            name: "pickup_manager".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    /// Reservations waiting while the scheduler is idle would never expire
    fn check_expiry_scheduler(service: &ServiceHandle) -> ComponentCheck {
        let start = std::time::Instant::now();
        let manager = service.manager();

        let (status, message) = match manager.has_active() {
            Ok(true) if !manager.scheduler().is_armed() => (
                HealthStatus::Degraded,
                Some("Reservations pending but expiry scheduler is idle".to_string()),
            ),
            Ok(_) => (HealthStatus::Healthy, None),
            Err(e) => (
                HealthStatus::Unhealthy,
                Some(format!("Cannot inspect queues: {}", e)),
            ),
        };

        ComponentCheck {
            name: "expiry_scheduler".to_string(),
            status,
            message,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn gather_service_stats(service: &ServiceHandle) -> ServiceStats {
        let uptime_info = format!("Up {}s", service.uptime().as_secs());

        match service.manager().stats() {
            Ok(stats) => ServiceStats {
                gametypes: stats.gametypes,
                players_waiting: stats.players_waiting,
                subscriptions: stats.subscriptions,
                matches_formed: stats.matches_formed,
                players_queued: stats.players_queued,
                evictions: stats.evictions,
                scheduler_armed: stats.scheduler_armed,
                uptime_info,
            },
            Err(e) => {
                debug!("Failed to get pickup stats for health check: {}", e);
                ServiceStats {
                    uptime_info,
                    ..ServiceStats::default()
                }
            }
        }
    }
}

/// Convert health check to JSON string
impl HealthCheck {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pickup::manager::{PickupManager, PickupOptions};
    use crate::types::{Gametype, PlayerIdentity};
    use std::sync::Arc;

    fn create_test_handle(running: bool) -> ServiceHandle {
        let manager = PickupManager::new(PickupOptions::default());
        manager
            .add_gametype(Gametype::new("duel", 2, 2, None).unwrap())
            .unwrap();
        ServiceHandle::new("pickup-room-test", Arc::new(manager), running)
    }

    #[tokio::test]
    async fn test_healthy_service() {
        let handle = create_test_handle(true);
        handle
            .manager()
            .add_player(&PlayerIdentity::irc("alice"), &["duel".to_string()], None);

        let health = HealthCheck::check(&handle).await.unwrap();
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(health.stats.gametypes, 1);
        assert_eq!(health.stats.players_waiting, 1);
        assert!(health.stats.scheduler_armed);
        assert!(health.to_json().unwrap().contains("pickup_manager"));
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let handle = create_test_handle(false);
        assert_eq!(
            HealthCheck::liveness_check(&handle).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::readiness_check(&handle).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert_eq!(
            HealthCheck::check(&handle).await.unwrap().status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn test_worst_status_wins() {
        assert_eq!(
            HealthStatus::Healthy.worst(&HealthStatus::Degraded),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::Degraded.worst(&HealthStatus::Unhealthy),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Healthy.as_gauge(), 2);
    }
}
