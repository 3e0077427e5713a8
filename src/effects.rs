//! Effect runner for the poll loop
//!
//! Executes the effects produced by the scheduler: account lookups, usage
//! fetches, the single-shot poll timer, and write-back of the last-used
//! counters. Results come back to the loop as events.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::ApiClient;
use crate::metrics::MetricsCollector;
use crate::scheduler::{Effect, Event};
use crate::settings::SettingsStore;

/// Trait for running effects asynchronously.
/// Completion events are sent back via the provided channel.
pub trait EffectRunner: Send + Sync + 'static {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>);
}

/// Effect runner backed by the real usage API.
pub struct PollEffectRunner {
    client: ApiClient,
    settings: Arc<Mutex<SettingsStore>>,
    metrics: Arc<Mutex<MetricsCollector>>,
    /// Cancels the armed poll timer
    timer: std::sync::Mutex<Option<CancellationToken>>,
}

impl PollEffectRunner {
    pub fn new(
        client: ApiClient,
        settings: Arc<Mutex<SettingsStore>>,
        metrics: Arc<Mutex<MetricsCollector>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            client,
            settings,
            metrics,
            timer: std::sync::Mutex::new(None),
        })
    }

    /// Swap in a new timer token, cancelling the previous one.
    fn replace_timer(&self, token: Option<CancellationToken>) {
        let mut guard = match self.timer.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(previous) = std::mem::replace(&mut *guard, token) {
            previous.cancel();
        }
    }
}

impl EffectRunner for PollEffectRunner {
    fn spawn(&self, effect: Effect, tx: mpsc::Sender<Event>) {
        match effect {
            Effect::ResolveOrganization {
                cycle_id,
                credential,
            } => {
                let client = self.client.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    metrics.lock().await.start_cycle(cycle_id);

                    let event = match client.resolve_organization(&credential).await {
                        Ok(organization_id) => {
                            log::info!("Api: resolved organization {}", organization_id);
                            let mut m = metrics.lock().await;
                            if m.is_active_cycle(cycle_id) {
                                m.identity_resolved();
                            }
                            Event::OrganizationResolved {
                                cycle_id,
                                organization_id,
                            }
                        }
                        Err(error) => {
                            log::warn!("Api: account lookup failed: {}", error);
                            record_failure(&metrics, cycle_id, &error).await;
                            Event::OrganizationFailed { cycle_id, error }
                        }
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::FetchUsage {
                cycle_id,
                credential,
                organization_id,
            } => {
                let client = self.client.clone();
                let metrics = self.metrics.clone();

                tokio::spawn(async move {
                    {
                        let mut m = metrics.lock().await;
                        if !m.is_active_cycle(cycle_id) {
                            m.start_cycle(cycle_id);
                        }
                    }

                    let event = match client.fetch_usage(&credential, &organization_id).await {
                        Ok(snapshot) => {
                            let mut m = metrics.lock().await;
                            if m.is_active_cycle(cycle_id) {
                                m.cycle_completed();
                            }
                            Event::UsageFetched { cycle_id, snapshot }
                        }
                        Err(error) => {
                            log::warn!("Api: usage fetch failed: {}", error);
                            record_failure(&metrics, cycle_id, &error).await;
                            Event::UsageFailed { cycle_id, error }
                        }
                    };
                    let _ = tx.send(event).await;
                });
            }

            Effect::ArmTimer { timer_id, delay } => {
                let token = CancellationToken::new();
                self.replace_timer(Some(token.clone()));
                log::debug!("Timer {} armed for {:?}", timer_id, delay);

                tokio::spawn(async move {
                    tokio::select! {
                        _ = token.cancelled() => {
                            log::debug!("Timer {} cancelled", timer_id);
                        }
                        _ = tokio::time::sleep(delay) => {
                            let _ = tx.send(Event::TimerFired { timer_id }).await;
                        }
                    }
                });
            }

            Effect::CancelTimer => self.replace_timer(None),

            Effect::PersistLastUsed {
                session_used,
                weekly_used,
            } => {
                let settings = self.settings.clone();
                tokio::spawn(async move {
                    let mut store = settings.lock().await;
                    if let Err(e) = store.record_last_used(session_used, weekly_used) {
                        log::warn!("Settings: failed to persist last-used counters: {}", e);
                    }
                });
            }

            Effect::Render(_) => {
                log::warn!("Render effect reached the runner; it belongs to the poll loop");
            }
        }
    }
}

async fn record_failure(
    metrics: &Arc<Mutex<MetricsCollector>>,
    cycle_id: Uuid,
    error: &crate::api::FetchError,
) {
    let mut m = metrics.lock().await;
    if m.is_active_cycle(cycle_id) {
        m.cycle_failed(error.kind(), error.to_string());
    }
}
