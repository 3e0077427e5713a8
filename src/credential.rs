//! Session credential lookup and change notification.
//!
//! The credential is read from `USAGE_PANEL_SESSION_KEY` first, then from the
//! OS's native secret storage:
//! - Linux: libsecret (GNOME Keyring/KDE Wallet)
//! - macOS: Keychain
//! - Windows: Credential Manager
//!
//! Never log the credential value; use `mask_credential`.

use keyring::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::scheduler::Event;

const SERVICE_NAME: &str = "usage-panel";
const SESSION_KEY_NAME: &str = "session-key";
const SESSION_KEY_ENV: &str = "USAGE_PANEL_SESSION_KEY";

/// Read the session key from the keyring.
/// Returns None if not configured or on error (errors are logged).
pub fn keyring_credential() -> Option<String> {
    let entry = match Entry::new(SERVICE_NAME, SESSION_KEY_NAME) {
        Ok(e) => e,
        Err(e) => {
            log::warn!("Credential: failed to create keyring entry: {}", e);
            return None;
        }
    };

    match entry.get_password() {
        Ok(key) => non_empty(key),
        Err(keyring::Error::NoEntry) => None,
        Err(e) => {
            log::warn!("Credential: failed to retrieve session key: {}", e);
            None
        }
    }
}

/// Current credential, or an empty string when none is configured.
pub fn load_credential() -> String {
    std::env::var(SESSION_KEY_ENV)
        .ok()
        .and_then(non_empty)
        .or_else(keyring_credential)
        .unwrap_or_default()
}

/// Masked form for display and logs (e.g. "sk-...abc123").
pub fn mask_credential(credential: &str) -> String {
    let credential = credential.trim();
    let chars: Vec<char> = credential.chars().collect();
    if chars.is_empty() {
        "<none>".to_string()
    } else if chars.len() <= 8 {
        "*".repeat(chars.len())
    } else {
        let head: String = chars[..3].iter().collect();
        let tail: String = chars[chars.len() - 6..].iter().collect();
        format!("{}...{}", head, tail)
    }
}

fn non_empty(s: String) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Re-reads the credential periodically and reports changes to the poll loop.
pub struct CredentialWatcher {
    cancel_token: CancellationToken,
}

impl CredentialWatcher {
    /// Start watching with `load_credential` as the source.
    pub fn start(tx: mpsc::Sender<Event>, current: String, period: Duration) -> Self {
        Self::start_with(tx, current, period, load_credential)
    }

    /// Start watching with a custom credential source.
    ///
    /// `source` may block (keyring lookups do), so it runs on the blocking
    /// pool rather than the runtime thread.
    pub fn start_with<F>(
        tx: mpsc::Sender<Event>,
        current: String,
        period: Duration,
        source: F,
    ) -> Self
    where
        F: Fn() -> String + Send + Sync + 'static,
    {
        let source = Arc::new(source);
        let cancel_token = CancellationToken::new();
        let cancel = cancel_token.clone();

        log::info!(
            "Credential: watching for changes every {}s",
            period.as_secs()
        );

        tokio::spawn(async move {
            let mut last_seen = current;
            let mut interval = tokio::time::interval(period);
            // First tick completes immediately; the caller already has `current`.
            interval.tick().await;

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        log::debug!("Credential: watcher cancelled");
                        break;
                    }

                    _ = interval.tick() => {
                        let read = source.clone();
                        let credential = match tokio::task::spawn_blocking(move || (*read)()).await {
                            Ok(credential) => credential,
                            Err(e) => {
                                log::warn!("Credential: lookup task failed: {}", e);
                                continue;
                            }
                        };
                        if credential == last_seen {
                            continue;
                        }
                        log::info!(
                            "Credential: changed ({} -> {})",
                            mask_credential(&last_seen),
                            mask_credential(&credential)
                        );
                        last_seen = credential.clone();
                        if tx.send(Event::CredentialChanged { credential }).await.is_err() {
                            log::debug!("Credential: watcher stopping - channel closed");
                            break;
                        }
                    }
                }
            }
        });

        Self { cancel_token }
    }

    pub fn stop(&self) {
        self.cancel_token.cancel();
    }
}

impl Drop for CredentialWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn masking_hides_the_middle() {
        assert_eq!(mask_credential(""), "<none>");
        assert_eq!(mask_credential("short"), "*****");
        assert_eq!(mask_credential("sk-ant-sid01-abcdef123456"), "sk-...123456");
    }

    #[test]
    fn blank_values_are_absent() {
        assert_eq!(non_empty("  ".into()), None);
        assert_eq!(non_empty(" key ".into()), Some("key".into()));
    }

    #[tokio::test]
    async fn watcher_reports_only_changes() {
        let (tx, mut rx) = mpsc::channel(8);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_source = calls.clone();

        let watcher = CredentialWatcher::start_with(
            tx,
            "old".to_string(),
            Duration::from_millis(10),
            move || {
                let n = calls_in_source.fetch_add(1, Ordering::SeqCst);
                if n == 0 {
                    "old".to_string()
                } else {
                    "new".to_string()
                }
            },
        );

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("watcher should report a change")
            .expect("channel open");
        assert!(matches!(event, Event::CredentialChanged { ref credential } if credential == "new"));

        // Value stays "new" afterwards, so nothing else is reported.
        let quiet = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(quiet.is_err());

        drop(watcher);
    }

    #[tokio::test]
    async fn slow_source_does_not_stall_the_runtime() {
        let (tx, _rx) = mpsc::channel(8);
        let watcher = CredentialWatcher::start_with(
            tx,
            "same".to_string(),
            Duration::from_millis(5),
            || {
                std::thread::sleep(Duration::from_millis(300));
                "same".to_string()
            },
        );

        // Single-threaded runtime: a lookup on this thread would hold the
        // sleep below well past its deadline.
        let started = std::time::Instant::now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            started.elapsed() < Duration::from_millis(250),
            "timer delayed to {:?}",
            started.elapsed()
        );

        drop(watcher);
    }
}
