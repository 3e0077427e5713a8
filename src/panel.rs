//! Presentation sink and the view model it renders from.
//!
//! The sink itself (panel widget, tray, terminal) lives outside this crate;
//! it receives one `PanelUpdate` per finished poll cycle.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::usage::{QuotaWindow, UsageSnapshot, WindowKind};

/// Visual fill ratio never exceeds this, even far over the limit.
pub const MAX_FILL_RATIO: f64 = 1.5;
pub const WARNING_PERCENT: u32 = 80;
pub const CRITICAL_PERCENT: u32 = 100;

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Result of one poll cycle, as handed to the sink.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum PanelUpdate {
    Usage {
        snapshot: UsageSnapshot,
        #[serde(rename = "showCounts")]
        show_counts: bool,
        /// Higher of the two window percentages, for the panel icon
        #[serde(rename = "worstPercent")]
        worst_percent: u32,
    },
    Error {
        message: String,
    },
}

impl PanelUpdate {
    pub fn usage(snapshot: UsageSnapshot, show_counts: bool) -> Self {
        let worst_percent = snapshot.worst_percent();
        PanelUpdate::Usage {
            snapshot,
            show_counts,
            worst_percent,
        }
    }
}

/// Receives render requests from the poll loop.
pub trait PresentationSink: Send + Sync + 'static {
    fn render(&self, update: &PanelUpdate);
}

/// Panel icon state, driven by the worst window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum IconLevel {
    Normal,
    Warning,
    Critical,
}

impl IconLevel {
    pub fn from_percent(percent: u32) -> Self {
        if percent >= CRITICAL_PERCENT {
            IconLevel::Critical
        } else if percent >= WARNING_PERCENT {
            IconLevel::Warning
        } else {
            IconLevel::Normal
        }
    }
}

/// Fill ratio for a progress bar, clamped to `MAX_FILL_RATIO`.
pub fn fill_ratio(window: &QuotaWindow) -> f64 {
    if window.limit == 0 {
        return 0.0;
    }
    (window.used as f64 / window.limit as f64).min(MAX_FILL_RATIO)
}

/// Rendered fill width; never wider than the track.
pub fn fill_width(window: &QuotaWindow, track_width: f64) -> f64 {
    (fill_ratio(window) * track_width).min(track_width).max(0.0)
}

/// Parse a reset time: RFC 3339, or epoch seconds/milliseconds.
pub fn parse_reset_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let epoch: i64 = raw.parse().ok()?;
    if epoch > EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(epoch).single()
    } else {
        Utc.timestamp_opt(epoch, 0).single()
    }
}

/// "resets in 2h 05m", "resets in 3d 4h", or "resetting now".
pub fn format_reset(reset_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let remaining = reset_at - now;
    let minutes = remaining.num_minutes();
    if minutes <= 0 {
        return "resetting now".to_string();
    }

    let days = minutes / (24 * 60);
    let hours = (minutes / 60) % 24;
    let mins = minutes % 60;

    if days > 0 {
        format!("resets in {}d {}h", days, hours)
    } else if hours > 0 {
        format!("resets in {}h {:02}m", hours, mins)
    } else {
        format!("resets in {}m", mins)
    }
}

/// Group digits with commas: 1234567 -> "1,234,567".
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// One progress bar.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarView {
    pub kind: WindowKind,
    pub percent: u32,
    pub fill_ratio: f64,
    /// "24%" or "24% (48,000 / 200,000)"
    pub text: String,
    pub reset_text: Option<String>,
}

impl BarView {
    pub fn new(kind: WindowKind, window: &QuotaWindow, show_counts: bool, now: DateTime<Utc>) -> Self {
        let percent = window.percent();
        let text = if show_counts {
            format!(
                "{}% ({} / {})",
                percent,
                format_count(window.used),
                format_count(window.limit)
            )
        } else {
            format!("{}%", percent)
        };
        let reset_text = window
            .reset_at
            .as_deref()
            .and_then(parse_reset_time)
            .map(|at| format_reset(at, now));

        Self {
            kind,
            percent,
            fill_ratio: fill_ratio(window),
            text,
            reset_text,
        }
    }

    fn line(&self) -> String {
        match &self.reset_text {
            Some(reset) => format!("{}: {} · {}", self.kind.label(), self.text, reset),
            None => format!("{}: {}", self.kind.label(), self.text),
        }
    }
}

/// Everything a panel needs to draw one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelView {
    pub session: BarView,
    pub weekly: BarView,
    pub worst_percent: u32,
    pub icon: IconLevel,
    pub tooltip: String,
}

impl PanelView {
    pub fn from_snapshot(snapshot: &UsageSnapshot, show_counts: bool, now: DateTime<Utc>) -> Self {
        let session = BarView::new(WindowKind::Session, &snapshot.session, show_counts, now);
        let weekly = BarView::new(WindowKind::Weekly, &snapshot.weekly, show_counts, now);
        let worst_percent = snapshot.worst_percent();
        let tooltip = format!("{}\n{}", session.line(), weekly.line());

        Self {
            session,
            weekly,
            worst_percent,
            icon: IconLevel::from_percent(worst_percent),
            tooltip,
        }
    }
}

/// Sink that writes each update to the log.
#[derive(Debug, Default)]
pub struct LogSink;

impl PresentationSink for LogSink {
    fn render(&self, update: &PanelUpdate) {
        match update {
            PanelUpdate::Usage {
                snapshot,
                show_counts,
                ..
            } => {
                let view = PanelView::from_snapshot(snapshot, *show_counts, Utc::now());
                log::info!("Panel [{:?}] {}", view.icon, view.tooltip.replace('\n', " | "));
            }
            PanelUpdate::Error { message } => {
                log::warn!("Panel [error] {}", message);
            }
        }
    }
}
