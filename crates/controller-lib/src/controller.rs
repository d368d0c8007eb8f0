//! Control loop scheduling reconcile passes per Autoscaler
//!
//! A ticker scans the store and dispatches every identity whose next pass
//! is due onto its own task. An identity never has two passes in flight.
//! Failing identities back off exponentially; successful ones come back
//! after the reconciler's requeue interval.

use crate::error::Error;
use crate::health::{components, HealthRegistry};
use crate::models::ObjectRef;
use crate::observability::ControllerMetrics;
use crate::reconciler::{Action, Reconciler};
use crate::store::AutoscalerStore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// How often the store is scanned for due identities
    pub tick_interval: Duration,
    /// Deadline for a whole reconcile pass
    pub pass_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            pass_timeout: Duration::from_secs(120),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Delay before retrying an identity whose last pass failed
pub fn next_backoff(current: Option<Duration>, initial: Duration, max: Duration) -> Duration {
    match current {
        None => initial.min(max),
        Some(previous) => previous.saturating_mul(2).min(max),
    }
}

#[derive(Debug)]
enum PassOutcome {
    Completed(Action),
    Failed(Error),
    TimedOut,
}

#[derive(Debug)]
struct Schedule {
    next_due: Instant,
    in_flight_since: Option<Instant>,
    backoff: Option<Duration>,
    /// Waiting for the object to reappear
    parked: bool,
}

impl Schedule {
    fn due_now(now: Instant) -> Self {
        Self {
            next_due: now,
            in_flight_since: None,
            backoff: None,
            parked: false,
        }
    }
}

pub struct Controller {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn AutoscalerStore>,
    config: ControllerConfig,
    health: HealthRegistry,
    metrics: ControllerMetrics,
    schedules: HashMap<ObjectRef, Schedule>,
    tasks: JoinSet<(ObjectRef, PassOutcome)>,
}

impl Controller {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn AutoscalerStore>,
        config: ControllerConfig,
        health: HealthRegistry,
    ) -> Self {
        Self {
            reconciler,
            store,
            config,
            health,
            metrics: ControllerMetrics::new(),
            schedules: HashMap::new(),
            tasks: JoinSet::new(),
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            pass_timeout_secs = self.config.pass_timeout.as_secs(),
            "Starting autoscaler control loop"
        );

        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.dispatch_due().await;
                }
                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok((key, outcome)) => self.complete(key, outcome).await,
                        Err(e) => error!(error = %e, "Reconcile task panicked"),
                    }
                }
                _ = shutdown.recv() => {
                    info!(in_flight = self.tasks.len(), "Shutting down autoscaler control loop");
                    self.tasks.abort_all();
                    break;
                }
            }
        }
    }

    async fn dispatch_due(&mut self) {
        let keys = match self.store.list().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list autoscalers");
                self.health
                    .set_degraded(components::STORE, e.to_string())
                    .await;
                return;
            }
        };

        let now = Instant::now();
        let listed: HashSet<&ObjectRef> = keys.iter().collect();
        let metrics = &self.metrics;
        self.schedules.retain(|key, s| {
            let keep = listed.contains(key) || s.in_flight_since.is_some();
            if !keep {
                debug!(autoscaler = %key, "Autoscaler left the store, dropping schedule");
                metrics.clear_autoscaler(key);
            }
            keep
        });

        // A pass that outlived its deadline by a full timeout was lost to a panic
        let lost_after = self.config.pass_timeout.saturating_mul(2);

        for key in &keys {
            let schedule = self
                .schedules
                .entry(key.clone())
                .or_insert_with(|| Schedule::due_now(now));

            if let Some(since) = schedule.in_flight_since {
                if now.duration_since(since) < lost_after {
                    continue;
                }
                warn!(autoscaler = %key, "Reconcile pass lost, rescheduling");
                schedule.in_flight_since = None;
            }
            if schedule.parked || now < schedule.next_due {
                continue;
            }

            schedule.in_flight_since = Some(now);
            let reconciler = self.reconciler.clone();
            let pass_timeout = self.config.pass_timeout;
            let key = key.clone();
            debug!(autoscaler = %key, "Dispatching reconcile pass");

            self.tasks.spawn(async move {
                let outcome =
                    match tokio::time::timeout(pass_timeout, reconciler.reconcile(&key)).await {
                        Ok(Ok(action)) => PassOutcome::Completed(action),
                        Ok(Err(e)) => PassOutcome::Failed(e),
                        Err(_) => PassOutcome::TimedOut,
                    };
                (key, outcome)
            });
        }
    }

    async fn complete(&mut self, key: ObjectRef, outcome: PassOutcome) {
        let now = Instant::now();
        let Some(schedule) = self.schedules.get_mut(&key) else {
            return;
        };
        schedule.in_flight_since = None;

        match outcome {
            PassOutcome::Completed(action) => {
                schedule.backoff = None;
                match action.requeue_after() {
                    Some(after) => schedule.next_due = now + after,
                    None => schedule.parked = true,
                }
                self.health.set_healthy(components::CONTROLLER).await;
            }
            PassOutcome::Failed(e) => {
                let backoff = next_backoff(
                    schedule.backoff,
                    self.config.initial_backoff,
                    self.config.max_backoff,
                );
                schedule.backoff = Some(backoff);
                schedule.next_due = now + backoff;
                warn!(
                    autoscaler = %key,
                    error = %e,
                    retry_in_ms = backoff.as_millis() as u64,
                    "Reconcile pass failed"
                );
                self.health
                    .set_degraded(components::CONTROLLER, format!("{}: {}", key, e))
                    .await;
            }
            PassOutcome::TimedOut => {
                self.metrics.inc_reconcile("timeout");
                let backoff = next_backoff(
                    schedule.backoff,
                    self.config.initial_backoff,
                    self.config.max_backoff,
                );
                schedule.backoff = Some(backoff);
                schedule.next_due = now + backoff;
                warn!(
                    autoscaler = %key,
                    timeout_secs = self.config.pass_timeout.as_secs_f64(),
                    retry_in_ms = backoff.as_millis() as u64,
                    "Reconcile pass timed out"
                );
                self.health
                    .set_degraded(components::CONTROLLER, format!("{}: pass timed out", key))
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::health::ComponentStatus;
    use crate::models::{
        Autoscaler, AutoscalerSpec, Model, ModelKind, OccumConfig, ScaleTargetRef, TrafficMetric,
    };
    use crate::prediction::{AlgorithmRunner, OccumPredicter};
    use crate::store::InMemoryStore;
    use crate::traffic::TrafficGatherer;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedGatherer(f64);

    #[async_trait]
    impl TrafficGatherer for FixedGatherer {
        async fn gather_traffic(&self, _autoscaler: &Autoscaler) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct DelayedRunner {
        delay: Duration,
    }

    #[async_trait]
    impl AlgorithmRunner for DelayedRunner {
        async fn run_with_input(&self, _: &str, _: &str, _: Duration) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            Ok("2".to_string())
        }
    }

    /// Wraps a store, counting reads and optionally rejecting writes
    struct CountingStore {
        inner: InMemoryStore,
        gets: AtomicUsize,
        reject_writes: bool,
    }

    #[async_trait]
    impl AutoscalerStore for CountingStore {
        async fn get(&self, key: &ObjectRef) -> Result<Autoscaler> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(key).await
        }

        async fn update_status(&self, autoscaler: &Autoscaler) -> Result<()> {
            if self.reject_writes {
                return Err(Error::Store("conflict".to_string()));
            }
            self.inner.update_status(autoscaler).await
        }

        async fn list(&self) -> Result<Vec<ObjectRef>> {
            self.inner.list().await
        }
    }

    fn autoscaler(name: &str) -> Autoscaler {
        Autoscaler::new(
            ObjectRef::new("default", name),
            AutoscalerSpec {
                scale_target_ref: ScaleTargetRef {
                    kind: "Deployment".to_string(),
                    name: name.to_string(),
                },
                min_replicas: 1,
                max_replicas: Some(10),
                traffic_metric: Some(TrafficMetric {
                    prometheus_query: "up".to_string(),
                }),
                models: vec![Model {
                    name: "occum".to_string(),
                    calculation_timeout: None,
                    kind: ModelKind::Occum {
                        occum: OccumConfig {
                            look_ahead: 5,
                            history_size: 50,
                            traffic_per_replica: 10.0,
                        },
                    },
                }],
            },
        )
    }

    fn store(names: &[&str], reject_writes: bool) -> Arc<CountingStore> {
        let inner = InMemoryStore::new();
        for name in names {
            inner.insert(autoscaler(name));
        }
        Arc::new(CountingStore {
            inner,
            gets: AtomicUsize::new(0),
            reject_writes,
        })
    }

    fn controller(
        store: Arc<CountingStore>,
        runner_delay: Duration,
        sync_period: Duration,
        config: ControllerConfig,
    ) -> (Controller, HealthRegistry) {
        let predicter = OccumPredicter::new(Arc::new(DelayedRunner {
            delay: runner_delay,
        }));
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FixedGatherer(15.0)),
            Arc::new(predicter),
        )
        .with_sync_period(sync_period);
        let health = HealthRegistry::new();
        let controller = Controller::new(Arc::new(reconciler), store, config, health.clone());
        (controller, health)
    }

    fn fast_config() -> ControllerConfig {
        ControllerConfig {
            tick_interval: Duration::from_millis(10),
            pass_timeout: Duration::from_secs(5),
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(1),
        }
    }

    async fn run_for(controller: Controller, duration: Duration) {
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(controller.run(rx));
        tokio::time::sleep(duration).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let initial = Duration::from_secs(1);
        let max = Duration::from_secs(300);

        let mut backoff = None;
        let mut seen = Vec::new();
        for _ in 0..10 {
            let next = next_backoff(backoff, initial, max);
            seen.push(next.as_secs());
            backoff = Some(next);
        }

        assert_eq!(seen, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 300]);
    }

    #[tokio::test]
    async fn test_requeues_healthy_autoscalers() {
        let store = store(&["api", "web"], false);
        let (controller, health) = controller(
            store.clone(),
            Duration::ZERO,
            Duration::from_millis(50),
            fast_config(),
        );

        run_for(controller, Duration::from_millis(400)).await;

        for name in ["api", "web"] {
            let stored = store.inner.get(&ObjectRef::new("default", name)).await.unwrap();
            assert!(stored.status.model_histories[0].len() >= 2);
            assert_eq!(stored.status.desired_replicas, Some(2));
        }
        assert_eq!(
            health.status_of(components::CONTROLLER).await,
            Some(ComponentStatus::Healthy)
        );
    }

    #[tokio::test]
    async fn test_one_pass_in_flight_per_identity() {
        let store = store(&["web"], false);
        let (controller, _) = controller(
            store.clone(),
            Duration::from_millis(150),
            Duration::ZERO,
            fast_config(),
        );

        run_for(controller, Duration::from_millis(400)).await;

        // Ticks every 10ms, but each pass holds the identity for 150ms
        let gets = store.gets.load(Ordering::SeqCst);
        assert!((1..=4).contains(&gets), "unexpected pass count {}", gets);
    }

    #[tokio::test]
    async fn test_failing_identity_backs_off() {
        let store = store(&["web"], true);
        let (controller, health) = controller(
            store.clone(),
            Duration::ZERO,
            Duration::ZERO,
            fast_config(),
        );

        run_for(controller, Duration::from_millis(500)).await;

        // Due at 0ms, then after 200ms, then after a further 400ms
        let gets = store.gets.load(Ordering::SeqCst);
        assert!((1..=3).contains(&gets), "unexpected pass count {}", gets);
        assert_eq!(
            health.status_of(components::CONTROLLER).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_pass_timeout_cancels_slow_prediction() {
        let store = store(&["web"], false);
        let config = ControllerConfig {
            pass_timeout: Duration::from_millis(50),
            ..fast_config()
        };
        let (controller, health) =
            controller(store.clone(), Duration::from_secs(10), Duration::ZERO, config);

        run_for(controller, Duration::from_millis(150)).await;

        let stored = store.inner.get(&ObjectRef::new("default", "web")).await.unwrap();
        assert!(stored.status.last_reconcile_time.is_none());
        assert_eq!(
            health.status_of(components::CONTROLLER).await,
            Some(ComponentStatus::Degraded)
        );
    }

    #[tokio::test]
    async fn test_deleted_identity_is_parked() {
        let store = store(&["web"], false);
        let (mut controller, _) = controller(
            store.clone(),
            Duration::ZERO,
            Duration::from_millis(10),
            fast_config(),
        );
        let key = ObjectRef::new("default", "web");

        controller
            .schedules
            .insert(key.clone(), Schedule::due_now(Instant::now()));
        controller
            .complete(key.clone(), PassOutcome::Completed(Action::await_change()))
            .await;

        assert!(controller.schedules[&key].parked);
        controller.dispatch_due().await;
        assert!(controller.tasks.is_empty());
    }

    #[tokio::test]
    async fn test_removed_identity_drops_schedule_and_metrics() {
        let store = store(&["web"], false);
        let (mut controller, _) = controller(
            store.clone(),
            Duration::ZERO,
            Duration::from_secs(60),
            fast_config(),
        );
        let gone = ObjectRef::new("controller-test", "gone");
        controller
            .metrics
            .set_history_samples(&gone, crate::models::ModelType::Occum, 3);
        controller
            .schedules
            .insert(gone.clone(), Schedule::due_now(Instant::now()));

        controller.dispatch_due().await;

        assert!(!controller.schedules.contains_key(&gone));
        let name = gone.to_string();
        let remaining = prometheus::gather()
            .iter()
            .filter(|family| family.get_name() == "phpa_history_samples")
            .flat_map(|family| family.get_metric())
            .filter(|metric| metric.get_label().iter().any(|l| l.get_value() == name))
            .count();
        assert_eq!(remaining, 0);
    }
}
