use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::EnvFilter;

use usage_panel::api::ApiClient;
use usage_panel::credential::{load_credential, mask_credential, CredentialWatcher};
use usage_panel::effects::PollEffectRunner;
use usage_panel::metrics::MetricsCollector;
use usage_panel::panel::LogSink;
use usage_panel::scheduler::PollState;
use usage_panel::settings::{default_settings_path, SettingsStore};
use usage_panel::{run_poll_loop, PollHandle, EVENT_CHANNEL_CAPACITY};

const CREDENTIAL_CHECK_PERIOD: Duration = Duration::from_secs(30);

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Load .env file if present (for development convenience)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "usage_panel=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let store = SettingsStore::open(default_settings_path()?);
    let settings = store.settings().clone();
    log::info!("Settings: loaded from {:?}", store.path());

    let client = ApiClient::new(&settings.base_url)?;
    let credential = load_credential();
    log::info!(
        "Polling {} with credential {}",
        client.base_url(),
        mask_credential(&credential)
    );

    let state = PollState::new(&settings, credential.clone());
    let metrics = Arc::new(Mutex::new(MetricsCollector::new()));
    let runner = PollEffectRunner::new(client, Arc::new(Mutex::new(store)), metrics.clone());

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    let watcher = CredentialWatcher::start(tx.clone(), credential, CREDENTIAL_CHECK_PERIOD);
    spawn_signal_handlers(PollHandle::new(tx.clone()));

    let final_state = run_poll_loop(state, rx, tx, runner, Arc::new(LogSink)).await;
    drop(watcher);

    let summary = metrics.lock().await.get_summary();
    log::info!(
        "Shutdown: {} cycles ({} ok, {} failed, avg {}ms), last used session={} weekly={}",
        summary.total_cycles,
        summary.successful_cycles,
        summary.failed_cycles,
        summary.avg_total_cycle_ms,
        final_state.last_session_used,
        final_state.last_weekly_used
    );
    if let Some(error) = summary.last_error {
        log::info!("Shutdown: last error ({}) {}", error.error_type, error.message);
    }
    Ok(())
}

/// Ctrl-C shuts down; SIGUSR1 (unix) requests an immediate refresh.
fn spawn_signal_handlers(handle: PollHandle) {
    let exit_handle = handle.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                let _ = exit_handle.shutdown().await;
            }
            Err(e) => log::warn!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let mut refresh = match signal(SignalKind::user_defined1()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Failed to listen for SIGUSR1: {}", e);
                return;
            }
        };
        while refresh.recv().await.is_some() {
            log::info!("Refresh requested (SIGUSR1)");
            if handle.refresh().await.is_err() {
                break;
            }
        }
    });

    #[cfg(not(unix))]
    drop(handle);
}
