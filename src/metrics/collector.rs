//! Metrics collection using Prometheus
//!
//! Counters and gauges for queue activity, formed matches and the expiry
//! scheduler, registered on a private registry so several engines can live
//! in one process (tests, benches).

use crate::pickup::manager::PickupStats;
use crate::types::Match;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
    Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the pickup service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Queue-related metrics
    queue_metrics: QueueMetrics,

    /// Match-related metrics
    match_metrics: MatchMetrics,

    /// Expiry scheduler metrics
    scheduler_metrics: SchedulerMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Commands handled by kind and outcome
    pub commands_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Queue-related metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Total reservations inserted
    pub players_queued_total: IntCounterVec,

    /// Total reservations removed, by reason
    pub players_withdrawn_total: IntCounterVec,

    /// Players currently waiting per gametype
    pub players_waiting: IntGaugeVec,

    /// Configured gametypes
    pub gametypes: IntGauge,

    /// Active subscriptions
    pub subscriptions: IntGauge,
}

/// Match-related metrics
#[derive(Clone)]
pub struct MatchMetrics {
    /// Matches formed by gametype and start kind
    pub matches_formed_total: IntCounterVec,

    /// Players placed into matches
    pub players_matched_total: IntCounterVec,

    /// Time between a player's reservation and the match forming
    pub queue_wait_time_seconds: HistogramVec,
}

/// Expiry scheduler metrics
#[derive(Clone)]
pub struct SchedulerMetrics {
    /// 1 while the scheduler is armed
    pub armed: IntGauge,

    /// Scheduler ticks processed
    pub ticks_total: IntCounter,

    /// Entries evicted by the scheduler
    pub evictions_total: IntCounterVec,

    /// Expiry warnings issued
    pub warnings_total: IntCounterVec,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Engine operation durations
    pub operation_duration: HistogramVec,

    /// Time spent in one scheduler tick
    pub tick_duration: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let queue_metrics = QueueMetrics::new(&registry)?;
        let match_metrics = MatchMetrics::new(&registry)?;
        let scheduler_metrics = SchedulerMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            queue_metrics,
            match_metrics,
            scheduler_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn matches(&self) -> &MatchMetrics {
        &self.match_metrics
    }

    pub fn scheduler(&self) -> &SchedulerMetrics {
        &self.scheduler_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Refresh gauges from a manager statistics snapshot
    pub fn update_from_pickup_stats(&self, stats: &PickupStats) {
        for (gametype, waiting) in &stats.waiting_by_gametype {
            self.queue_metrics
                .players_waiting
                .with_label_values(&[gametype.as_str()])
                .set(*waiting as i64);
        }
        self.queue_metrics.gametypes.set(stats.gametypes as i64);
        self.queue_metrics
            .subscriptions
            .set(stats.subscriptions as i64);
        self.scheduler_metrics
            .armed
            .set(if stats.scheduler_armed { 1 } else { 0 });
    }

    /// Record a reservation being inserted
    pub fn record_player_queued(&self, gametype: &str) {
        self.queue_metrics
            .players_queued_total
            .with_label_values(&[gametype])
            .inc();
        self.queue_metrics
            .players_waiting
            .with_label_values(&[gametype])
            .inc();
    }

    /// Record reservations leaving a queue without forming a match
    pub fn record_players_withdrawn(&self, gametype: &str, reason: &str, count: usize) {
        if count == 0 {
            return;
        }
        self.queue_metrics
            .players_withdrawn_total
            .with_label_values(&[gametype, reason])
            .inc_by(count as u64);
        self.queue_metrics
            .players_waiting
            .with_label_values(&[gametype])
            .sub(count as i64);
    }

    /// Record a match forming, with the wait time of each drained player
    pub fn record_match_formed(&self, formed: &Match, waits: &[Duration]) {
        let kind = if formed.forced { "forced" } else { "full" };
        let gametype = formed.gametype.as_str();

        self.match_metrics
            .matches_formed_total
            .with_label_values(&[gametype, kind])
            .inc();
        self.match_metrics
            .players_matched_total
            .with_label_values(&[gametype])
            .inc_by(formed.player_count() as u64);
        self.queue_metrics
            .players_waiting
            .with_label_values(&[gametype])
            .set(0);

        for wait in waits {
            self.match_metrics
                .queue_wait_time_seconds
                .with_label_values(&[gametype])
                .observe(wait.as_secs_f64());
        }
    }

    /// Record an eviction by the expiry scheduler
    pub fn record_eviction(&self, gametype: &str) {
        self.scheduler_metrics
            .evictions_total
            .with_label_values(&[gametype])
            .inc();
        self.queue_metrics
            .players_waiting
            .with_label_values(&[gametype])
            .dec();
    }

    /// Record an expiry warning
    pub fn record_warning(&self, gametype: &str) {
        self.scheduler_metrics
            .warnings_total
            .with_label_values(&[gametype])
            .inc();
    }

    /// Record one scheduler tick
    pub fn record_tick(&self, duration: Duration) {
        self.scheduler_metrics.ticks_total.inc();
        self.performance_metrics
            .tick_duration
            .observe(duration.as_secs_f64());
    }

    pub fn set_scheduler_armed(&self, armed: bool) {
        self.scheduler_metrics
            .armed
            .set(if armed { 1 } else { 0 });
    }

    /// Drop the per-gametype series of a removed gametype
    pub fn forget_gametype(&self, gametype: &str) {
        let _ = self
            .queue_metrics
            .players_waiting
            .remove_label_values(&[gametype]);
    }

    /// Record a handled chat command
    pub fn record_command(&self, command: &str, success: bool) {
        let status = if success { "ok" } else { "error" };
        self.service_metrics
            .commands_total
            .with_label_values(&[command, status])
            .inc();
    }

    /// Record engine operation duration
    pub fn record_operation(&self, operation: &str, duration: Duration) {
        self.performance_metrics
            .operation_duration
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("pickup_room_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let commands_total = IntCounterVec::new(
            Opts::new("pickup_room_commands_total", "Chat commands handled"),
            &["command", "status"],
        )?;
        registry.register(Box::new(commands_total.clone()))?;

        let health_status = IntGauge::new(
            "pickup_room_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("pickup_room_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            commands_total,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let players_queued_total = IntCounterVec::new(
            Opts::new("pickup_room_players_queued_total", "Total players queued"),
            &["gametype"],
        )?;
        registry.register(Box::new(players_queued_total.clone()))?;

        let players_withdrawn_total = IntCounterVec::new(
            Opts::new(
                "pickup_room_players_withdrawn_total",
                "Reservations removed without a match",
            ),
            &["gametype", "reason"],
        )?;
        registry.register(Box::new(players_withdrawn_total.clone()))?;

        let players_waiting = IntGaugeVec::new(
            Opts::new(
                "pickup_room_players_waiting",
                "Players currently waiting in queue",
            ),
            &["gametype"],
        )?;
        registry.register(Box::new(players_waiting.clone()))?;

        let gametypes = IntGauge::new("pickup_room_gametypes", "Configured gametypes")?;
        registry.register(Box::new(gametypes.clone()))?;

        let subscriptions = IntGauge::new("pickup_room_subscriptions", "Active subscriptions")?;
        registry.register(Box::new(subscriptions.clone()))?;

        Ok(Self {
            players_queued_total,
            players_withdrawn_total,
            players_waiting,
            gametypes,
            subscriptions,
        })
    }
}

impl MatchMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_formed_total = IntCounterVec::new(
            Opts::new("pickup_room_matches_formed_total", "Total matches formed"),
            &["gametype", "kind"],
        )?;
        registry.register(Box::new(matches_formed_total.clone()))?;

        let players_matched_total = IntCounterVec::new(
            Opts::new("pickup_room_players_matched_total", "Total players matched"),
            &["gametype"],
        )?;
        registry.register(Box::new(players_matched_total.clone()))?;

        let queue_wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pickup_room_queue_wait_time_seconds",
                "Time from reservation to match",
            )
            .buckets(vec![30.0, 60.0, 300.0, 600.0, 900.0, 1200.0, 1800.0, 3600.0]),
            &["gametype"],
        )?;
        registry.register(Box::new(queue_wait_time_seconds.clone()))?;

        Ok(Self {
            matches_formed_total,
            players_matched_total,
            queue_wait_time_seconds,
        })
    }
}

impl SchedulerMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let armed = IntGauge::new(
            "pickup_room_scheduler_armed",
            "Expiry scheduler armed (1) or idle (0)",
        )?;
        registry.register(Box::new(armed.clone()))?;

        let ticks_total =
            IntCounter::new("pickup_room_scheduler_ticks_total", "Scheduler ticks")?;
        registry.register(Box::new(ticks_total.clone()))?;

        let evictions_total = IntCounterVec::new(
            Opts::new("pickup_room_evictions_total", "Expired reservations evicted"),
            &["gametype"],
        )?;
        registry.register(Box::new(evictions_total.clone()))?;

        let warnings_total = IntCounterVec::new(
            Opts::new("pickup_room_warnings_total", "Expiry warnings issued"),
            &["gametype"],
        )?;
        registry.register(Box::new(warnings_total.clone()))?;

        Ok(Self {
            armed,
            ticks_total,
            evictions_total,
            warnings_total,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "pickup_room_operation_duration_seconds",
                "Engine operation duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let tick_duration = Histogram::with_opts(
            HistogramOpts::new(
                "pickup_room_tick_duration_seconds",
                "Expiry scheduler tick duration",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05]),
        )?;
        registry.register(Box::new(tick_duration.clone()))?;

        Ok(Self {
            operation_duration,
            tick_duration,
        })
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new().expect("Failed to create default metrics collector")
    }
}
