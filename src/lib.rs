pub mod api;
pub mod credential;
pub mod effects;
pub mod metrics;
pub mod panel;
pub mod scheduler;
pub mod settings;
pub mod usage;

use std::sync::Arc;
use tokio::sync::mpsc;

use effects::EffectRunner;
use panel::{PanelUpdate, PresentationSink};
use scheduler::{reduce, Effect, Event, PollState};

/// Capacity of the poll loop's event channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Sender side of the poll loop, for callers outside it.
#[derive(Clone)]
pub struct PollHandle {
    tx: mpsc::Sender<Event>,
}

impl PollHandle {
    pub fn new(tx: mpsc::Sender<Event>) -> Self {
        Self { tx }
    }

    /// Poll now, keeping the cached organization.
    pub async fn refresh(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(Event::RefreshRequested).await
    }

    /// Report a new credential value.
    pub async fn set_credential(
        &self,
        credential: String,
    ) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(Event::CredentialChanged { credential }).await
    }

    pub async fn shutdown(&self) -> Result<(), mpsc::error::SendError<Event>> {
        self.tx.send(Event::Exit).await
    }
}

fn render(sink: &Arc<dyn PresentationSink>, update: &PanelUpdate) {
    log::debug!("Rendering panel update: {:?}", serde_json::to_string(update));
    sink.render(update);
}

/// Run the poll loop until `Event::Exit` arrives or every sender is gone.
///
/// The first cycle starts immediately. All state lives here and is only
/// touched by this task; the final state is returned on shutdown.
pub async fn run_poll_loop(
    mut state: PollState,
    mut rx: mpsc::Receiver<Event>,
    tx: mpsc::Sender<Event>,
    effect_runner: Arc<dyn EffectRunner>,
    sink: Arc<dyn PresentationSink>,
) -> PollState {
    log::info!("Poll loop started");

    let mut next_event = Some(Event::Start);
    while let Some(event) = next_event.take() {
        log::debug!("Received event: {:?}", event);

        // Handle Exit at the edge
        if matches!(event, Event::Exit) {
            log::info!("Exit requested, shutting down poll loop");
            effect_runner.spawn(Effect::CancelTimer, tx.clone());
            break;
        }

        let old_discriminant = std::mem::discriminant(&state.phase);
        let (next, effects) = reduce(&state, event);
        if old_discriminant != std::mem::discriminant(&next.phase) {
            log::debug!("Phase transition: {:?} -> {:?}", state.phase, next.phase);
        }
        state = next;

        for eff in effects {
            match eff {
                Effect::Render(update) => render(&sink, &update),
                other => effect_runner.spawn(other, tx.clone()),
            }
        }

        next_event = rx.recv().await;
    }

    log::info!("Poll loop ended");
    state
}
