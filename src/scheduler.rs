//! Adaptive poll scheduler
//!
//! All poll-cycle state lives in one `PollState` owned by the poll loop.
//! Every transition goes through `reduce()`, which returns the next state and
//! the effects to run. Network calls and timers report back as events tagged
//! with the id of the cycle or timer that produced them, so late results
//! from a superseded cycle are dropped instead of overwriting newer data.

use std::time::Duration;
use uuid::Uuid;

use crate::api::FetchError;
use crate::panel::PanelUpdate;
use crate::settings::PanelSettings;
use crate::usage::UsageSnapshot;

/// Delay before retrying after any failed cycle, regardless of the
/// configured intervals.
pub const ERROR_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Where the current poll cycle is.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Phase {
    /// No request in flight; a timer may be armed
    #[default]
    Idle,
    ResolvingIdentity {
        cycle_id: Uuid,
    },
    FetchingUsage {
        cycle_id: Uuid,
    },
}

/// Everything the scheduler knows between cycles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollState {
    pub phase: Phase,
    pub credential: String,
    /// Cached until the credential changes
    pub organization_id: Option<String>,
    pub last_session_used: u64,
    pub last_weekly_used: u64,
    pub active_interval: Duration,
    pub idle_interval: Duration,
    /// Delay of the most recently armed timer
    pub current_interval: Duration,
    /// Id of the armed timer, if any
    pub timer_id: Option<Uuid>,
    pub show_counts: bool,
}

impl PollState {
    pub fn new(settings: &PanelSettings, credential: String) -> Self {
        Self {
            phase: Phase::Idle,
            credential,
            organization_id: None,
            last_session_used: settings.last_session_used,
            last_weekly_used: settings.last_weekly_used,
            active_interval: settings.active_interval(),
            idle_interval: settings.idle_interval(),
            current_interval: Duration::ZERO,
            timer_id: None,
            show_counts: settings.show_counts,
        }
    }

    /// Id of the in-flight cycle, if any.
    pub fn cycle_id(&self) -> Option<Uuid> {
        match self.phase {
            Phase::Idle => None,
            Phase::ResolvingIdentity { cycle_id } | Phase::FetchingUsage { cycle_id } => {
                Some(cycle_id)
            }
        }
    }
}

/// Inputs to the scheduler.
#[derive(Debug, Clone)]
pub enum Event {
    /// Poll loop started; run the first cycle now
    Start,
    /// Armed timer elapsed (id guards against superseded timers)
    TimerFired { timer_id: Uuid },
    /// User asked for an immediate refresh
    RefreshRequested,
    /// Credential value changed in the store
    CredentialChanged { credential: String },
    /// Shut the poll loop down
    Exit,

    OrganizationResolved {
        cycle_id: Uuid,
        organization_id: String,
    },
    OrganizationFailed {
        cycle_id: Uuid,
        error: FetchError,
    },
    UsageFetched {
        cycle_id: Uuid,
        snapshot: UsageSnapshot,
    },
    UsageFailed {
        cycle_id: Uuid,
        error: FetchError,
    },
}

/// Work requested by a transition.
#[derive(Debug, Clone)]
pub enum Effect {
    ResolveOrganization {
        cycle_id: Uuid,
        credential: String,
    },
    FetchUsage {
        cycle_id: Uuid,
        credential: String,
        organization_id: String,
    },
    /// Arm a single-shot timer that sends `TimerFired { timer_id }`
    ArmTimer { timer_id: Uuid, delay: Duration },
    /// Invalidate the armed timer
    CancelTimer,
    PersistLastUsed {
        session_used: u64,
        weekly_used: u64,
    },
    /// Handled by the poll loop, not the effect runner
    Render(PanelUpdate),
}

/// Reducer function: (state, event) -> (next_state, effects)
///
/// Key rules:
/// - A new timer is armed only once a cycle has fully finished
/// - Out-of-band cycles cancel the armed timer first
/// - Completion events for any cycle but the current one are ignored
pub fn reduce(state: &PollState, event: Event) -> (PollState, Vec<Effect>) {
    use Event::*;
    use Phase::*;

    let is_current = |id: Uuid| state.cycle_id() == Some(id);

    match (&state.phase, event) {
        (_, Start) | (_, RefreshRequested) => begin_cycle(state),

        (_, CredentialChanged { credential }) => {
            if credential == state.credential {
                return (state.clone(), vec![]);
            }
            let mut next = state.clone();
            next.credential = credential;
            next.organization_id = None;
            begin_cycle(&next)
        }

        (Idle, TimerFired { timer_id }) if state.timer_id == Some(timer_id) => {
            let mut next = state.clone();
            next.timer_id = None;
            begin_cycle(&next)
        }

        (
            ResolvingIdentity { cycle_id },
            OrganizationResolved {
                cycle_id: id,
                organization_id,
            },
        ) if *cycle_id == id => {
            let mut next = state.clone();
            next.organization_id = Some(organization_id.clone());
            next.phase = FetchingUsage { cycle_id: id };
            (
                next,
                vec![Effect::FetchUsage {
                    cycle_id: id,
                    credential: state.credential.clone(),
                    organization_id,
                }],
            )
        }

        (ResolvingIdentity { cycle_id }, OrganizationFailed { cycle_id: id, error })
            if *cycle_id == id =>
        {
            fail_cycle(state, error)
        }

        (FetchingUsage { cycle_id }, UsageFetched { cycle_id: id, snapshot }) if *cycle_id == id => {
            complete_cycle(state, snapshot)
        }

        (FetchingUsage { cycle_id }, UsageFailed { cycle_id: id, error }) if *cycle_id == id => {
            fail_cycle(state, error)
        }

        (_, OrganizationResolved { cycle_id, .. })
        | (_, OrganizationFailed { cycle_id, .. })
        | (_, UsageFetched { cycle_id, .. })
        | (_, UsageFailed { cycle_id, .. })
            if !is_current(cycle_id) =>
        {
            log::debug!("Scheduler: dropping result of superseded cycle {}", cycle_id);
            (state.clone(), vec![])
        }

        // Superseded timers and events that don't apply in this phase
        (_, event) => {
            log::debug!("Scheduler: ignoring {:?} in {:?}", event, state.phase);
            (state.clone(), vec![])
        }
    }
}

/// Start a cycle immediately, superseding any armed timer or in-flight cycle.
fn begin_cycle(state: &PollState) -> (PollState, Vec<Effect>) {
    let mut next = state.clone();
    let mut effects = Vec::new();

    if next.timer_id.take().is_some() {
        effects.push(Effect::CancelTimer);
    }

    let cycle_id = Uuid::new_v4();
    match &state.organization_id {
        Some(organization_id) => {
            next.phase = Phase::FetchingUsage { cycle_id };
            effects.push(Effect::FetchUsage {
                cycle_id,
                credential: state.credential.clone(),
                organization_id: organization_id.clone(),
            });
        }
        None => {
            next.phase = Phase::ResolvingIdentity { cycle_id };
            effects.push(Effect::ResolveOrganization {
                cycle_id,
                credential: state.credential.clone(),
            });
        }
    }

    (next, effects)
}

fn complete_cycle(state: &PollState, snapshot: UsageSnapshot) -> (PollState, Vec<Effect>) {
    let active = usage_increased(state, &snapshot);
    let delay = if active {
        state.active_interval
    } else {
        state.idle_interval
    };

    log::info!(
        "Scheduler: session {}/{}, weekly {}/{} ({}), next poll in {}s",
        snapshot.session.used,
        snapshot.session.limit,
        snapshot.weekly.used,
        snapshot.weekly.limit,
        if active { "active" } else { "idle" },
        delay.as_secs()
    );

    let mut next = state.clone();
    next.phase = Phase::Idle;
    next.last_session_used = snapshot.session.used;
    next.last_weekly_used = snapshot.weekly.used;

    let mut effects = vec![
        Effect::PersistLastUsed {
            session_used: snapshot.session.used,
            weekly_used: snapshot.weekly.used,
        },
        Effect::Render(PanelUpdate::usage(snapshot, state.show_counts)),
    ];
    effects.push(arm(&mut next, delay));
    (next, effects)
}

fn fail_cycle(state: &PollState, error: FetchError) -> (PollState, Vec<Effect>) {
    log::warn!(
        "Scheduler: cycle failed ({}), retrying in {}s",
        error,
        ERROR_RETRY_DELAY.as_secs()
    );

    let mut next = state.clone();
    next.phase = Phase::Idle;
    let mut effects = vec![Effect::Render(PanelUpdate::Error {
        message: error.to_string(),
    })];
    effects.push(arm(&mut next, ERROR_RETRY_DELAY));
    (next, effects)
}

fn arm(state: &mut PollState, delay: Duration) -> Effect {
    let timer_id = Uuid::new_v4();
    state.timer_id = Some(timer_id);
    state.current_interval = delay;
    Effect::ArmTimer { timer_id, delay }
}

/// Usage is "active" when either window's `used` went up since the last
/// successful read. A drop (window reset) counts as idle.
pub fn usage_increased(state: &PollState, snapshot: &UsageSnapshot) -> bool {
    snapshot.session.used > state.last_session_used || snapshot.weekly.used > state.last_weekly_used
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usage::QuotaWindow;
    use chrono::Utc;

    fn settings() -> PanelSettings {
        PanelSettings {
            active_interval_secs: 30,
            idle_interval_secs: 600,
            ..PanelSettings::default()
        }
    }

    fn state() -> PollState {
        PollState::new(&settings(), "token".to_string())
    }

    fn snapshot(session_used: u64, weekly_used: u64) -> UsageSnapshot {
        UsageSnapshot {
            session: QuotaWindow::new(session_used, 200_000, None),
            weekly: QuotaWindow::new(weekly_used, 1_000_000, None),
            fetched_at: Utc::now(),
        }
    }

    fn armed_delay(effects: &[Effect]) -> Option<Duration> {
        effects.iter().find_map(|e| match e {
            Effect::ArmTimer { delay, .. } => Some(*delay),
            _ => None,
        })
    }

    fn fetching(state: &PollState) -> PollState {
        let mut s = state.clone();
        s.organization_id = Some("org-1".into());
        s.phase = Phase::FetchingUsage {
            cycle_id: Uuid::new_v4(),
        };
        s
    }

    #[test]
    fn start_without_org_resolves_identity() {
        let (next, effects) = reduce(&state(), Event::Start);
        assert!(matches!(next.phase, Phase::ResolvingIdentity { .. }));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::ResolveOrganization { credential, .. } if credential == "token")));
        assert!(armed_delay(&effects).is_none());
    }

    #[test]
    fn start_with_cached_org_fetches_usage() {
        let mut s = state();
        s.organization_id = Some("org-1".into());
        let (next, effects) = reduce(&s, Event::Start);
        assert!(matches!(next.phase, Phase::FetchingUsage { .. }));
        assert!(effects.iter().any(
            |e| matches!(e, Effect::FetchUsage { organization_id, .. } if organization_id == "org-1")
        ));
    }

    #[test]
    fn resolved_org_is_cached_and_usage_fetched() {
        let (resolving, _) = reduce(&state(), Event::Start);
        let cycle_id = resolving.cycle_id().unwrap();
        let (next, effects) = reduce(
            &resolving,
            Event::OrganizationResolved {
                cycle_id,
                organization_id: "org-9".into(),
            },
        );
        assert_eq!(next.organization_id.as_deref(), Some("org-9"));
        assert_eq!(next.phase, Phase::FetchingUsage { cycle_id });
        assert!(matches!(
            effects.as_slice(),
            [Effect::FetchUsage { organization_id, .. }] if organization_id == "org-9"
        ));
    }

    #[test]
    fn org_failure_backs_off_and_renders_error() {
        let (resolving, _) = reduce(&state(), Event::Start);
        let cycle_id = resolving.cycle_id().unwrap();
        let (next, effects) = reduce(
            &resolving,
            Event::OrganizationFailed {
                cycle_id,
                error: FetchError::OrganizationNotFound,
            },
        );
        assert_eq!(next.phase, Phase::Idle);
        assert_eq!(armed_delay(&effects), Some(ERROR_RETRY_DELAY));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::Render(PanelUpdate::Error { .. }))));
    }

    #[test]
    fn rising_usage_selects_active_interval() {
        let mut s = fetching(&state());
        s.last_session_used = 1000;
        let cycle_id = s.cycle_id().unwrap();
        let (next, effects) = reduce(
            &s,
            Event::UsageFetched {
                cycle_id,
                snapshot: snapshot(5000, 0),
            },
        );
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(30)));
        assert_eq!(next.current_interval, Duration::from_secs(30));
        assert_eq!(next.last_session_used, 5000);
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::PersistLastUsed {
                session_used: 5000,
                weekly_used: 0
            }
        )));
    }

    #[test]
    fn unchanged_usage_selects_idle_interval() {
        let mut s = fetching(&state());
        s.last_session_used = 1000;
        s.last_weekly_used = 20;
        let cycle_id = s.cycle_id().unwrap();
        let (_, effects) = reduce(
            &s,
            Event::UsageFetched {
                cycle_id,
                snapshot: snapshot(1000, 20),
            },
        );
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(600)));
    }

    #[test]
    fn weekly_increase_alone_is_active() {
        let mut s = fetching(&state());
        s.last_session_used = 1000;
        s.last_weekly_used = 20;
        let cycle_id = s.cycle_id().unwrap();
        let (_, effects) = reduce(
            &s,
            Event::UsageFetched {
                cycle_id,
                snapshot: snapshot(1000, 21),
            },
        );
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(30)));
    }

    #[test]
    fn usage_drop_after_window_reset_is_idle() {
        let mut s = fetching(&state());
        s.last_session_used = 9000;
        let cycle_id = s.cycle_id().unwrap();
        let (next, effects) = reduce(
            &s,
            Event::UsageFetched {
                cycle_id,
                snapshot: snapshot(100, 0),
            },
        );
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(600)));
        assert_eq!(next.last_session_used, 100);
    }

    #[test]
    fn persisted_counters_seed_the_first_comparison() {
        let persisted = PanelSettings {
            last_session_used: 5000,
            ..settings()
        };
        let mut s = fetching(&PollState::new(&persisted, "token".into()));
        s.last_weekly_used = 0;
        let cycle_id = s.cycle_id().unwrap();
        let (_, effects) = reduce(
            &s,
            Event::UsageFetched {
                cycle_id,
                snapshot: snapshot(5000, 0),
            },
        );
        assert_eq!(armed_delay(&effects), Some(Duration::from_secs(600)));
    }

    #[test]
    fn auth_failure_retries_at_fixed_backoff() {
        let s = fetching(&state());
        let cycle_id = s.cycle_id().unwrap();
        let (next, effects) = reduce(
            &s,
            Event::UsageFailed {
                cycle_id,
                error: FetchError::AuthFailed,
            },
        );
        assert_eq!(next.current_interval, ERROR_RETRY_DELAY);
        assert_eq!(armed_delay(&effects), Some(ERROR_RETRY_DELAY));
        assert!(effects.iter().any(|e| matches!(
            e,
            Effect::Render(PanelUpdate::Error { message }) if message.contains("Authentication")
        )));
        // No partial data and nothing persisted for a failed cycle
        assert!(!effects
            .iter()
            .any(|e| matches!(e, Effect::PersistLastUsed { .. })));
    }

    #[test]
    fn stale_usage_result_is_ignored() {
        let s = fetching(&state());
        let (next, effects) = reduce(
            &s,
            Event::UsageFetched {
                cycle_id: Uuid::new_v4(),
                snapshot: snapshot(1, 1),
            },
        );
        assert_eq!(next, s);
        assert!(effects.is_empty());
    }

    #[test]
    fn stale_timer_is_ignored() {
        let mut s = state();
        s.timer_id = Some(Uuid::new_v4());
        let (next, effects) = reduce(
            &s,
            Event::TimerFired {
                timer_id: Uuid::new_v4(),
            },
        );
        assert_eq!(next, s);
        assert!(effects.is_empty());
    }

    #[test]
    fn matching_timer_starts_a_cycle() {
        let mut s = state();
        let timer_id = Uuid::new_v4();
        s.timer_id = Some(timer_id);
        let (next, effects) = reduce(&s, Event::TimerFired { timer_id });
        assert!(next.timer_id.is_none());
        assert!(matches!(next.phase, Phase::ResolvingIdentity { .. }));
        // The timer already fired, nothing to cancel
        assert!(!effects.iter().any(|e| matches!(e, Effect::CancelTimer)));
    }

    #[test]
    fn credential_change_clears_org_and_cancels_timer() {
        let mut s = state();
        s.organization_id = Some("org-1".into());
        s.timer_id = Some(Uuid::new_v4());
        let (next, effects) = reduce(
            &s,
            Event::CredentialChanged {
                credential: "other".into(),
            },
        );
        assert_eq!(next.credential, "other");
        assert!(next.organization_id.is_none());
        assert!(next.timer_id.is_none());
        assert!(matches!(effects.first(), Some(Effect::CancelTimer)));
        assert!(effects.iter().any(
            |e| matches!(e, Effect::ResolveOrganization { credential, .. } if credential == "other")
        ));
    }

    #[test]
    fn credential_change_mid_cycle_supersedes_it() {
        let s = fetching(&state());
        let old_cycle = s.cycle_id().unwrap();
        let (next, _) = reduce(
            &s,
            Event::CredentialChanged {
                credential: "other".into(),
            },
        );
        assert_ne!(next.cycle_id(), Some(old_cycle));

        // The old cycle's response arrives late and is dropped
        let (after, effects) = reduce(
            &next,
            Event::UsageFetched {
                cycle_id: old_cycle,
                snapshot: snapshot(1, 1),
            },
        );
        assert_eq!(after, next);
        assert!(effects.is_empty());
    }

    #[test]
    fn unchanged_credential_is_a_no_op() {
        let s = state();
        let (next, effects) = reduce(
            &s,
            Event::CredentialChanged {
                credential: "token".into(),
            },
        );
        assert_eq!(next, s);
        assert!(effects.is_empty());
    }

    #[test]
    fn refresh_keeps_cached_org() {
        let mut s = state();
        s.organization_id = Some("org-1".into());
        s.timer_id = Some(Uuid::new_v4());
        let (next, effects) = reduce(&s, Event::RefreshRequested);
        assert_eq!(next.organization_id.as_deref(), Some("org-1"));
        assert!(matches!(effects.first(), Some(Effect::CancelTimer)));
        assert!(effects
            .iter()
            .any(|e| matches!(e, Effect::FetchUsage { .. })));
    }
}
