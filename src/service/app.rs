//! Main application state and service coordination
//!
//! This module contains the production AppState that wires the pickup
//! manager, command dispatcher, expiry scheduler and monitoring together and
//! owns their background tasks.

use crate::announce::publisher::ChatPublisher;
use crate::announce::text::Announcer;
use crate::command::handlers::{deliver, CommandDispatcher};
use crate::command::Reply;
use crate::config::AppConfig;
use crate::expiry::scheduler::ExpiryScheduler;
use crate::identity::{IdentityResolver, InMemoryIdentityDirectory};
use crate::metrics::health::HealthServerConfig;
use crate::metrics::{HealthServer, MetricsCollector, MetricsService};
use crate::pickup::manager::PickupManager;
use crate::pickup::teams::RoundRobinAssigner;
use crate::service::health::HealthCheck;
use crate::storage::{InMemoryStateStore, StateStore, TomlStateStore};
use crate::subscription::{EveryoneOnline, Presence};
use crate::types::PlayerIdentity;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Interval of the metrics refresh task
const METRICS_REFRESH_INTERVAL: Duration = Duration::from_secs(15);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Cheap, cloneable view of the running service for health checks
#[derive(Clone)]
pub struct ServiceHandle {
    name: String,
    manager: Arc<PickupManager>,
    is_running: Arc<RwLock<bool>>,
    started_at: Instant,
}

impl ServiceHandle {
    pub fn new(name: impl Into<String>, manager: Arc<PickupManager>, running: bool) -> Self {
        Self {
            name: name.into(),
            manager,
            is_running: Arc::new(RwLock::new(running)),
            started_at: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn manager(&self) -> &Arc<PickupManager> {
        &self.manager
    }

    pub async fn is_running(&self) -> bool {
        *self.is_running.read().await
    }

    async fn set_running(&self, running: bool) {
        *self.is_running.write().await = running;
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Main application state containing all service components
pub struct AppState {
    /// Application configuration
    config: AppConfig,

    /// Core pickup engine
    manager: Arc<PickupManager>,

    /// Chat command handling
    dispatcher: Arc<CommandDispatcher>,

    /// Outbound delivery to the chat connectors
    publisher: Arc<dyn ChatPublisher>,

    announcer: Announcer,

    /// Cross-platform account links used for name rendering
    identities: Arc<InMemoryIdentityDirectory>,

    /// Metrics service for monitoring and health checks
    metrics_service: Arc<MetricsService>,

    service: ServiceHandle,

    /// Background task handles
    background_tasks: Vec<JoinHandle<()>>,

    /// Stops the scheduler and refresh tasks
    shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Initialize the application with everyone treated as online
    pub async fn new(
        config: AppConfig,
        publisher: Arc<dyn ChatPublisher>,
    ) -> Result<Self, ServiceError> {
        Self::with_presence(config, publisher, Arc::new(EveryoneOnline)).await
    }

    /// Initialize the application with all dependencies
    pub async fn with_presence(
        config: AppConfig,
        publisher: Arc<dyn ChatPublisher>,
        presence: Arc<dyn Presence>,
    ) -> Result<Self, ServiceError> {
        info!("Initializing pickup-room service");
        info!(
            "Configuration: service={}, warn={}s, timeout={}s, captains={:?}, partial_start={:?}",
            config.service.name,
            config.pickup.warn_time_seconds,
            config.pickup.timeout_seconds,
            config.pickup.captain_policy,
            config.pickup.partial_start_policy
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let manager = Arc::new(Self::initialize_pickup_manager(
            &config,
            metrics_collector.clone(),
        )?);

        let identities = Arc::new(InMemoryIdentityDirectory::new());
        let resolver: Arc<dyn IdentityResolver> = identities.clone();
        let announcer = Announcer::new(resolver);
        let dispatcher = Arc::new(CommandDispatcher::new(
            manager.clone(),
            announcer.clone(),
            presence,
        ));

        let service = ServiceHandle::new(config.service.name.clone(), manager.clone(), false);
        let metrics_service = Self::initialize_metrics(&config, metrics_collector, &service);
        let (shutdown_tx, _) = broadcast::channel(4);

        Ok(Self {
            config,
            manager,
            dispatcher,
            publisher,
            announcer,
            identities,
            metrics_service,
            service,
            background_tasks: Vec::new(),
            shutdown_tx,
        })
    }

    /// Start the health server, the expiry scheduler and the refresh task
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting pickup-room service");

        self.service.set_running(true).await;

        self.start_metrics_service().await;
        self.start_expiry_scheduler();
        self.start_metrics_refresh();

        info!("✅ Pickup-room service started successfully");
        Ok(())
    }

    /// Perform graceful shutdown
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of pickup-room service");

        self.service.set_running(false).await;

        // Receivers may already be gone if tasks exited on their own
        if self.shutdown_tx.send(()).is_err() {
            debug!("No background task listening for shutdown");
        }

        info!("Stopping metrics service...");
        if let Err(e) = self.metrics_service.stop().await {
            warn!("Failed to stop metrics service: {}", e);
        } else {
            info!("✅ Metrics service stopped");
        }

        self.stop_background_tasks().await;

        let final_stats = self
            .manager
            .stats()
            .map_err(|e| ServiceError::BackgroundTask {
                message: format!("Failed to get final stats: {}", e),
            })?;

        info!("Final service statistics: {:?}", final_stats);
        info!("✅ Pickup-room service shutdown completed");
        Ok(())
    }

    /// Handle one chat line and deliver the replies
    pub async fn handle_chat_line(
        &self,
        caller: PlayerIdentity,
        is_admin: bool,
        line: &str,
    ) -> Vec<Reply> {
        let replies = self.dispatcher.handle_line(caller, is_admin, line);
        if let Err(e) = deliver(self.publisher.as_ref(), &replies).await {
            warn!("Failed to deliver command replies: {}", e);
        }
        replies
    }

    /// Get service configuration
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Check if service is running
    pub async fn is_running(&self) -> bool {
        self.service.is_running().await
    }

    pub fn service(&self) -> ServiceHandle {
        self.service.clone()
    }

    pub fn manager(&self) -> Arc<PickupManager> {
        self.manager.clone()
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        self.dispatcher.clone()
    }

    pub fn announcer(&self) -> &Announcer {
        &self.announcer
    }

    /// Directory the chat connectors link accounts into
    pub fn identities(&self) -> Arc<InMemoryIdentityDirectory> {
        self.identities.clone()
    }

    /// Get metrics service
    pub fn metrics_service(&self) -> Arc<MetricsService> {
        self.metrics_service.clone()
    }

    /// Build the manager, restore persisted state and seed configured gametypes
    fn initialize_pickup_manager(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
    ) -> Result<PickupManager, ServiceError> {
        let store: Arc<dyn StateStore> = match &config.persistence.state_file {
            Some(path) => {
                info!("Persisting pickup state to {}", path.display());
                Arc::new(TomlStateStore::new(path))
            }
            None => {
                warn!("No state file configured, gametypes and subscriptions are kept in memory");
                Arc::new(InMemoryStateStore::new())
            }
        };

        let manager = PickupManager::with_metrics(config.pickup_options(), metrics_collector)
            .with_assigner(Arc::new(RoundRobinAssigner::new(
                config.pickup.captain_policy,
            )))
            .with_store(store);

        manager
            .load_state()
            .map_err(|e| ServiceError::Persistence {
                message: format!("Failed to load pickup state: {:#}", e),
            })?;

        let seed = config
            .seed_gametypes()
            .map_err(|e| ServiceError::Configuration {
                message: format!("Invalid gametype in configuration: {:#}", e),
            })?;
        let seeded = manager
            .seed_gametypes(seed)
            .map_err(|e| ServiceError::Persistence {
                message: format!("Failed to seed gametypes: {:#}", e),
            })?;

        info!(
            "Pickup manager ready with {} gametypes ({} seeded from configuration)",
            manager.list_gametypes().map(|g| g.len()).unwrap_or(0),
            seeded
        );
        Ok(manager)
    }

    fn initialize_metrics(
        config: &AppConfig,
        metrics_collector: Arc<MetricsCollector>,
        service: &ServiceHandle,
    ) -> Arc<MetricsService> {
        info!(
            "Initializing metrics service on port {}",
            config.service.health_port
        );

        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };

        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_service(service.clone()),
        );
        Arc::new(MetricsService::new(metrics_collector, health_server))
    }

    async fn start_metrics_service(&mut self) {
        info!("Starting metrics and health endpoints");

        let metrics_service = self.metrics_service.clone();
        let port = self.config.service.health_port;

        let metrics_handle = tokio::spawn(async move {
            if let Err(e) = metrics_service.start().await {
                error!("Metrics service failed: {:#}", e);
            } else {
                info!("Metrics service task completed");
            }
        });
        self.background_tasks.push(metrics_handle);

        // Give the server a moment to bind
        tokio::time::sleep(Duration::from_millis(100)).await;

        info!("✅ Metrics service started on port {}", port);
    }

    fn start_expiry_scheduler(&mut self) {
        info!("Starting expiry scheduler task...");

        let scheduler = ExpiryScheduler::new(
            self.manager.clone(),
            self.publisher.clone(),
            self.announcer.clone(),
        );
        let handle = scheduler.spawn(self.shutdown_tx.subscribe());
        self.background_tasks.push(handle);
    }

    fn start_metrics_refresh(&mut self) {
        info!(
            "Starting metrics refresh task ({}s interval)...",
            METRICS_REFRESH_INTERVAL.as_secs()
        );

        let service = self.service.clone();
        let collector = self.metrics_service.collector();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(METRICS_REFRESH_INTERVAL);
            info!("Metrics refresh task started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.recv() => break,
                }

                collector
                    .service()
                    .uptime_seconds
                    .set(service.uptime().as_secs() as i64);

                match service.manager().stats() {
                    Ok(stats) => {
                        debug!(
                            "Updating metrics - gametypes: {}, waiting: {}, matches: {}",
                            stats.gametypes, stats.players_waiting, stats.matches_formed
                        );
                        collector.update_from_pickup_stats(&stats);
                    }
                    Err(e) => warn!("Failed to get pickup stats for metrics update: {}", e),
                }

                match HealthCheck::check(&service).await {
                    Ok(health) => {
                        collector.update_health_status(health.status.as_gauge());
                        for check in &health.checks {
                            collector.update_component_health(
                                &check.name,
                                check.status != crate::service::health::HealthStatus::Unhealthy,
                            );
                        }
                    }
                    Err(e) => warn!("Health check failed: {}", e),
                }
            }

            info!("Metrics refresh task stopped");
        });
        self.background_tasks.push(handle);
    }

    /// Wait briefly for tasks to observe shutdown, then abort stragglers
    async fn stop_background_tasks(&mut self) {
        info!("Stopping {} background tasks...", self.background_tasks.len());
        let deadline = self.config.shutdown_timeout();

        for mut task in self.background_tasks.drain(..) {
            match tokio::time::timeout(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) if e.is_cancelled() => {}
                Ok(Err(e)) => error!("Background task panicked: {}", e),
                Err(_) => {
                    warn!("Background task did not stop in time, aborting");
                    task.abort();
                }
            }
        }

        info!("✅ Background tasks stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::announce::publisher::MockPublisher;
    use crate::config::GametypeSettings;

    fn test_config(port: u16) -> AppConfig {
        let mut config = AppConfig::default();
        config.service.health_port = port;
        config.service.shutdown_timeout_seconds = 1;
        config.gametypes = vec![GametypeSettings {
            title: "duel".to_string(),
            players: 2,
            teams: None,
            stats_name: Some("duel".to_string()),
        }];
        config
    }

    #[tokio::test]
    async fn test_app_state_initialization_seeds_gametypes() {
        let publisher = Arc::new(MockPublisher::new());
        let app = AppState::new(test_config(18181), publisher).await.unwrap();

        assert!(!app.is_running().await);
        assert_eq!(app.manager().list_gametypes().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_start_handle_line_and_shutdown() {
        let publisher = Arc::new(MockPublisher::new());
        let mut app = AppState::new(test_config(18182), publisher.clone())
            .await
            .unwrap();
        app.start().await.unwrap();
        assert!(app.is_running().await);

        let alice = PlayerIdentity::irc("alice");
        let replies = app.handle_chat_line(alice, false, "!add duel").await;
        assert_eq!(replies.len(), 1);
        assert_eq!(publisher.last_topic().as_deref(), Some("Pickups: duel (1/2)"));

        app.shutdown().await.unwrap();
        assert!(!app.is_running().await);
    }

    #[tokio::test]
    async fn test_state_file_is_used() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config(18183);
        config.persistence.state_file = Some(dir.path().join("state.toml"));

        let app = AppState::new(config.clone(), Arc::new(MockPublisher::new()))
            .await
            .unwrap();
        app.manager()
            .subscribe(&PlayerIdentity::irc("bob"), "duel")
            .unwrap();
        drop(app);

        config.gametypes.clear();
        let restored = AppState::new(config, Arc::new(MockPublisher::new()))
            .await
            .unwrap();
        assert_eq!(
            restored.manager().list_subscribers("duel").unwrap(),
            vec![PlayerIdentity::irc("bob")]
        );
    }
}
