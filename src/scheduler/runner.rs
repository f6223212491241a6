//! Campaign scheduler runner.
//!
//! The scheduler follows a simple state machine:
//! 1. `Idle` until [`CampaignScheduler::run`] is called
//! 2. `Running`: on every timer tick (or `TriggerTick`) run one delivery pass
//! 3. `Stopped` after `Shutdown` or when every sender is dropped
//!
//! Passes run inline in the loop, so two never overlap. If a pass outlasts
//! the period the missed timer ticks are skipped rather than queued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info};

use super::{DeliveryLoop, SchedulerState};

/// Messages that can be sent to the scheduler.
#[derive(Debug, Clone)]
pub enum SchedulerMessage {
    /// Run a delivery pass now.
    TriggerTick,
    /// Stop the scheduler after the current pass.
    Shutdown,
}

/// Periodic driver of the delivery loop.
pub struct CampaignScheduler {
    /// Delivery loop run on every tick.
    delivery: DeliveryLoop,

    /// Scheduler state.
    state: Arc<RwLock<SchedulerState>>,

    /// Period between passes.
    tick_interval: Duration,
}

impl CampaignScheduler {
    /// Creates a new campaign scheduler.
    #[must_use]
    pub fn new(delivery: DeliveryLoop, tick_interval: Duration) -> Self {
        Self {
            delivery,
            state: Arc::new(RwLock::new(SchedulerState::new())),
            tick_interval,
        }
    }

    /// Runs the scheduler loop.
    pub async fn run(&self, mut rx: mpsc::Receiver<SchedulerMessage>) {
        info!(
            "Campaign scheduler started, tick every {:?}",
            self.tick_interval
        );
        self.state.write().await.start();

        let mut timer = interval(self.tick_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.tick().await;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(SchedulerMessage::TriggerTick) => {
                            debug!("Received trigger tick message");
                            self.tick().await;
                        }
                        Some(SchedulerMessage::Shutdown) | None => {
                            info!("Scheduler shutting down");
                            break;
                        }
                    }
                }
            }
        }

        self.state.write().await.stop();
    }

    /// Single delivery pass.
    async fn tick(&self) {
        let now = Utc::now();
        let started = Instant::now();

        match self.delivery.run_tick(now).await {
            Ok(report) => {
                let took = started.elapsed();
                if report.is_quiet() {
                    debug!(?report, "Tick finished in {:?}", took);
                } else {
                    info!(
                        sent = report.sent,
                        failed = report.failed,
                        accounts_failed = report.accounts_failed,
                        "Tick finished in {:?}",
                        took
                    );
                }
                self.state.write().await.record_tick(now, took, report);
            }
            Err(e) => {
                error!("Tick aborted, retrying next period: {}", e);
                self.state.write().await.record_abort(now);
            }
        }
    }

    /// Gets a reference to the scheduler state.
    #[must_use]
    pub fn state(&self) -> &Arc<RwLock<SchedulerState>> {
        &self.state
    }
}

impl std::fmt::Debug for CampaignScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignScheduler")
            .field("tick_interval", &self.tick_interval)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Phase;
    use crate::store::{Store, fixtures};
    use crate::telegram::ConnectionRegistry;
    use crate::telegram::testing::FakeConnector;

    #[tokio::test]
    async fn test_runs_until_shutdown() {
        let store = Store::in_memory().await.unwrap();
        let account = fixtures::active_account(&store).await;
        let campaign = fixtures::campaign(&store, &account.id, 3600, &["hi"]).await;
        let contact = fixtures::contact(&store, &account.id, &campaign.id, 3).await;

        let connector = Arc::new(FakeConnector::default());
        let (incoming_tx, _incoming_rx) = mpsc::channel(4);
        let registry = Arc::new(ConnectionRegistry::new(
            connector.clone(),
            Duration::ZERO,
            incoming_tx,
        ));
        let scheduler = CampaignScheduler::new(
            DeliveryLoop::new(store.clone(), registry),
            Duration::from_secs(3600),
        );
        assert_eq!(scheduler.state().read().await.phase, Phase::Idle);

        let (tx, rx) = mpsc::channel(4);
        tx.send(SchedulerMessage::TriggerTick).await.unwrap();
        tx.send(SchedulerMessage::Shutdown).await.unwrap();
        scheduler.run(rx).await;

        let state = scheduler.state().read().await;
        assert_eq!(state.phase, Phase::Stopped);
        assert!(state.ticks_completed >= 1);
        assert_eq!(store.get_contact(&contact.id).await.unwrap().current_step, 2);
        assert_eq!(connector.channel(&account.id).unwrap().sent().len(), 1);
    }

    #[tokio::test]
    async fn test_stops_when_senders_dropped() {
        let store = Store::in_memory().await.unwrap();
        let (incoming_tx, _incoming_rx) = mpsc::channel(4);
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(FakeConnector::default()),
            Duration::ZERO,
            incoming_tx,
        ));
        let scheduler = CampaignScheduler::new(
            DeliveryLoop::new(store, registry),
            Duration::from_secs(3600),
        );

        let (tx, rx) = mpsc::channel::<SchedulerMessage>(1);
        drop(tx);
        scheduler.run(rx).await;

        assert_eq!(scheduler.state().read().await.phase, Phase::Stopped);
    }
}
