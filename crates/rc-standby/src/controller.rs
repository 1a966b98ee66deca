//! Redundancy Controller
//!
//! Lease-based active/standby election over a shared instance record:
//! - The node named in `activeNodeName` is active and renews the keep-alive every poll
//! - Standby nodes count consecutive polls in which the keep-alive did not advance
//! - Once the count exceeds the stale poll limit, a standby node takes over
//! - `enabled = false` or exclusion from the allowed node list ends the controller
//!
//! There is no quorum and no fencing token. Two nodes may both claim activity
//! for up to one staleness window; the last write to the record wins.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{FatalReason, PollError, Result, StandbyError};
use crate::record::{keep_alive_now, InstanceKey, KeepAlive, ProcessInstance};
use crate::store::{InsertOutcome, InstanceStore};

/// Configuration for the redundancy controller
#[derive(Debug, Clone)]
pub struct RedundancyConfig {
    /// This node's identity
    pub node_name: String,

    /// Record key: process kind
    pub process_name: String,

    /// Record key: instance of the process kind
    pub instance_number: i32,

    pub poll_interval: Duration,

    /// Consecutive stale polls tolerated; takeover happens when the count exceeds it
    pub stale_poll_limit: u32,

    /// Written to `softwareVersion` while active
    pub software_version: String,
}

impl Default for RedundancyConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            process_name: String::new(),
            instance_number: 1,
            poll_interval: Duration::from_secs(rc_common::DEFAULT_POLL_INTERVAL_SECS),
            stale_poll_limit: rc_common::DEFAULT_STALE_POLL_LIMIT,
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl RedundancyConfig {
    pub fn new(node_name: impl Into<String>, process_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            process_name: process_name.into(),
            ..Default::default()
        }
    }

    pub fn with_instance_number(mut self, instance_number: i32) -> Self {
        self.instance_number = instance_number;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_stale_poll_limit(mut self, limit: u32) -> Self {
        self.stale_poll_limit = limit;
        self
    }

    pub fn with_software_version(mut self, version: impl Into<String>) -> Self {
        self.software_version = version.into();
        self
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.process_name.clone(), self.instance_number)
    }

    /// Rough failover latency: polls needed to declare the active node gone.
    /// Saturates at `Duration::MAX`.
    pub fn failover_window(&self) -> Duration {
        self.poll_interval
            .checked_mul(self.stale_poll_limit.saturating_add(1))
            .unwrap_or(Duration::MAX)
    }

    pub fn validate(&self) -> Result<()> {
        if self.node_name.trim().is_empty() {
            return Err(StandbyError::Config("node name must not be empty".to_string()));
        }
        if self.process_name.trim().is_empty() {
            return Err(StandbyError::Config("process name must not be empty".to_string()));
        }
        if self.poll_interval.is_zero() {
            return Err(StandbyError::Config("poll interval must be greater than zero".to_string()));
        }
        if self.poll_interval > Duration::from_secs(rc_common::MAX_POLL_INTERVAL_SECS) {
            return Err(StandbyError::Config(format!(
                "poll interval must not exceed {}s",
                rc_common::MAX_POLL_INTERVAL_SECS
            )));
        }
        Ok(())
    }
}

/// Status published to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedundancyStatus {
    /// No poll has produced a decision yet
    Starting,
    Active,
    Standby,
    /// Fatal policy hit; the process is expected to exit
    Terminated(FatalReason),
}

/// Decision reached by one successful poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// No record existed; this node created one. Activity is unchanged until the next poll
    Bootstrapped,
    /// The record names this node
    Active,
    /// Another node's keep-alive went stale and this node claimed activity
    TookOver { stale_polls: u32 },
    /// Another node holds activity
    Standby { stale_polls: u32 },
}

impl Decision {
    pub fn is_active(&self) -> bool {
        matches!(self, Decision::Active | Decision::TookOver { .. })
    }
}

/// In-memory poll state, rebuilt from scratch on every process start.
#[derive(Debug, Clone, Default)]
struct PollState {
    /// Keep-alive seen on the previous standby poll; outer `None` means nothing observed yet
    last_observed: Option<Option<DateTime<Utc>>>,
    stale_polls: u32,
    last_renewal: Option<DateTime<Utc>>,
}

/// Record-based redundancy controller
pub struct RedundancyController {
    config: RedundancyConfig,
    key: InstanceKey,
    store: Arc<dyn InstanceStore>,
    state: Mutex<PollState>,
    is_active: AtomicBool,
    running: AtomicBool,
    shutdown_tx: broadcast::Sender<()>,
    status_tx: watch::Sender<RedundancyStatus>,
    status_rx: watch::Receiver<RedundancyStatus>,
}

impl RedundancyController {
    pub fn new(config: RedundancyConfig, store: Arc<dyn InstanceStore>) -> Result<Self> {
        config.validate()?;

        let key = config.key();
        let (shutdown_tx, _) = broadcast::channel(1);
        let (status_tx, status_rx) = watch::channel(RedundancyStatus::Starting);

        Ok(Self {
            config,
            key,
            store,
            state: Mutex::new(PollState::default()),
            is_active: AtomicBool::new(false),
            running: AtomicBool::new(false),
            shutdown_tx,
            status_tx,
            status_rx,
        })
    }

    /// Last decision; safe to read at any time
    pub fn is_active(&self) -> bool {
        self.is_active.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> RedundancyStatus {
        *self.status_rx.borrow()
    }

    /// Subscribe to status transitions
    pub fn subscribe(&self) -> watch::Receiver<RedundancyStatus> {
        self.status_rx.clone()
    }

    pub fn config(&self) -> &RedundancyConfig {
        &self.config
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start polling on a background task.
    ///
    /// The task ends with `Ok(())` after [`shutdown`](Self::shutdown), or with
    /// [`StandbyError::Terminated`] when the record disables or excludes this node.
    pub fn start(self: Arc<Self>) -> Result<JoinHandle<Result<()>>> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(StandbyError::AlreadyRunning);
        }

        info!(
            node_name = %self.config.node_name,
            instance = %self.key,
            poll_interval = ?self.config.poll_interval,
            stale_poll_limit = self.config.stale_poll_limit,
            "Starting redundancy controller"
        );

        let controller = self.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();

        Ok(tokio::spawn(async move {
            let result = controller.run(shutdown_rx).await;
            controller.running.store(false, Ordering::SeqCst);
            result
        }))
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut ticker = interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let started = Instant::now();
                    let outcome = self.poll_once().await;

                    let elapsed = started.elapsed();
                    if elapsed > self.config.poll_interval {
                        warn!(
                            elapsed = ?elapsed,
                            poll_interval = ?self.config.poll_interval,
                            "Redundancy poll outlasted the poll interval, skipping missed ticks"
                        );
                    }

                    if let Err(PollError::Fatal(reason)) = outcome {
                        return Err(StandbyError::Terminated(reason));
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!(node_name = %self.config.node_name, "Redundancy controller shutting down");
                    return Ok(());
                }
            }
        }
    }

    /// Stop scheduling polls. Activity is not released; standby nodes take
    /// over through staleness detection.
    pub fn shutdown(&self) {
        info!(node_name = %self.config.node_name, "Stopping redundancy controller");
        let _ = self.shutdown_tx.send(());
    }

    /// Run one poll: read the record, decide, renew the lease when active.
    pub async fn poll_once(&self) -> std::result::Result<Decision, PollError> {
        let mut state = self.state.try_lock().map_err(|_| PollError::InFlight)?;

        if let RedundancyStatus::Terminated(reason) = self.status() {
            return Err(PollError::Fatal(reason));
        }

        let outcome = self.evaluate(&mut state).await;
        match &outcome {
            Ok(decision) => self.apply_decision(*decision, state.stale_polls),
            Err(PollError::Fatal(reason)) => self.terminate(*reason),
            Err(PollError::Transient(e)) => {
                warn!(
                    instance = %self.key,
                    error = %e,
                    is_active = self.is_active(),
                    "Redundancy store fault, keeping previous decision"
                );
            }
            Err(PollError::InFlight) => {}
        }
        outcome
    }

    async fn evaluate(&self, state: &mut PollState) -> std::result::Result<Decision, PollError> {
        let record = self.store.find(&self.key).await.map_err(PollError::Transient)?;

        let Some(record) = record else {
            return self.bootstrap().await;
        };

        self.check_eligibility(&record)?;

        // Work on a copy so a failed renewal leaves the counters untouched
        let mut next = state.clone();
        let decision = self.decide(&mut next, &record);

        if decision.is_active() {
            let keep_alive = self.next_keep_alive(&next, &record);
            self.store
                .update_keep_alive(&self.key, &keep_alive)
                .await
                .map_err(PollError::Transient)?;
            next.last_renewal = Some(keep_alive.time_tag);
        }

        *state = next;
        Ok(decision)
    }

    async fn bootstrap(&self) -> std::result::Result<Decision, PollError> {
        let record = ProcessInstance::bootstrap(&self.key, &self.config.node_name, keep_alive_now());

        match self.store.insert(&record).await.map_err(PollError::Transient)? {
            InsertOutcome::Inserted => {
                info!(instance = %self.key, node_name = %self.config.node_name, "Instance record not found, created one");
            }
            InsertOutcome::AlreadyExists => {
                info!(instance = %self.key, "Instance record was created concurrently by another node");
            }
        }
        Ok(Decision::Bootstrapped)
    }

    fn check_eligibility(&self, record: &ProcessInstance) -> std::result::Result<(), PollError> {
        if !record.enabled {
            return Err(PollError::Fatal(FatalReason::Disabled));
        }
        if !record.allows_node(&self.config.node_name) {
            return Err(PollError::Fatal(FatalReason::NodeNotAllowed));
        }
        Ok(())
    }

    fn decide(&self, state: &mut PollState, record: &ProcessInstance) -> Decision {
        if record.is_claimed_by(&self.config.node_name) {
            state.stale_polls = 0;
            return Decision::Active;
        }

        if self.is_active() {
            // Losing activity starts a fresh staleness count
            state.stale_polls = 0;
        }

        let observed = record.active_node_keep_alive_time_tag;
        if state.last_observed == Some(observed) {
            state.stale_polls = state.stale_polls.saturating_add(1);
            debug!(
                instance = %self.key,
                active_node = ?record.active_node_name,
                stale_polls = state.stale_polls,
                "Keep-alive from active node not updated"
            );
        } else {
            state.stale_polls = 0;
            debug!(
                instance = %self.key,
                active_node = ?record.active_node_name,
                "Keep-alive updated by active node, staying standby"
            );
        }
        state.last_observed = Some(observed);

        if state.stale_polls > self.config.stale_poll_limit {
            let stale_polls = state.stale_polls;
            state.stale_polls = 0;
            return Decision::TookOver { stale_polls };
        }

        Decision::Standby { stale_polls: state.stale_polls }
    }

    /// Renewal timestamp always moves forward, even if the local clock does not.
    /// Standby nodes read an unchanged timestamp as a missed renewal.
    fn next_keep_alive(&self, state: &PollState, record: &ProcessInstance) -> KeepAlive {
        let now = keep_alive_now();
        let previous = state.last_renewal.max(record.active_node_keep_alive_time_tag);

        let time_tag = match previous {
            Some(previous) if previous >= now => previous + chrono::Duration::milliseconds(1),
            _ => now,
        };

        KeepAlive {
            node_name: self.config.node_name.clone(),
            time_tag,
            software_version: self.config.software_version.clone(),
        }
    }

    fn apply_decision(&self, decision: Decision, stale_polls: u32) {
        // Re-creating a vanished record does not change activity; a cold start stays standby
        let active = match decision {
            Decision::Bootstrapped => self.is_active(),
            _ => decision.is_active(),
        };
        let was_active = self.is_active.swap(active, Ordering::SeqCst);
        let status = if active { RedundancyStatus::Active } else { RedundancyStatus::Standby };

        self.status_tx.send_if_modified(|current| {
            if *current != status {
                *current = status;
                true
            } else {
                false
            }
        });

        match (was_active, active) {
            (false, true) => {
                info!(
                    node_name = %self.config.node_name,
                    instance = %self.key,
                    takeover = matches!(decision, Decision::TookOver { .. }),
                    "Redundancy - node activated"
                );
            }
            (true, false) => {
                warn!(
                    node_name = %self.config.node_name,
                    instance = %self.key,
                    "Redundancy - node deactivated, another node holds activity"
                );
            }
            _ => {
                debug!(
                    node_name = %self.config.node_name,
                    instance = %self.key,
                    ?decision,
                    stale_polls,
                    "Redundancy - process {}",
                    if active { "active" } else { "inactive" }
                );
            }
        }
    }

    fn terminate(&self, reason: FatalReason) {
        self.is_active.store(false, Ordering::SeqCst);
        let _ = self.status_tx.send(RedundancyStatus::Terminated(reason));
        error!(
            node_name = %self.config.node_name,
            instance = %self.key,
            %reason,
            "Redundancy - fatal policy, controller must exit"
        );
    }
}
