//! Canonical usage data, independent of the upstream response shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Limit assigned to a window nothing could be read for.
/// Keeps the percentage math at 0% instead of dividing by zero.
pub const DEFAULT_LIMIT: u64 = 1;

/// Which rolling quota period a reading belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WindowKind {
    /// Short rolling window (hours-scale)
    Session,
    /// Rolling 7-day window
    Weekly,
}

impl WindowKind {
    pub fn label(&self) -> &'static str {
        match self {
            WindowKind::Session => "Session",
            WindowKind::Weekly => "Weekly",
        }
    }
}

/// One quota reading: tokens used against tokens allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaWindow {
    /// Tokens consumed in the window
    pub used: u64,
    /// Tokens allowed in the window (`DEFAULT_LIMIT` when unknown)
    pub limit: u64,
    /// When the window resets, as reported upstream
    pub reset_at: Option<String>,
}

impl QuotaWindow {
    pub fn new(used: u64, limit: u64, reset_at: Option<String>) -> Self {
        Self {
            used,
            limit,
            reset_at,
        }
    }

    /// Integer percentage `round(used / limit * 100)`; 0 when the limit is 0.
    pub fn percent(&self) -> u32 {
        if self.limit == 0 {
            return 0;
        }
        let pct = (self.used as f64 / self.limit as f64 * 100.0).round();
        if pct > u32::MAX as f64 {
            u32::MAX
        } else {
            pct as u32
        }
    }

    pub(crate) fn has_used(&self) -> bool {
        self.used > 0
    }

    pub(crate) fn has_limit(&self) -> bool {
        self.limit > DEFAULT_LIMIT
    }
}

impl Default for QuotaWindow {
    fn default() -> Self {
        Self {
            used: 0,
            limit: DEFAULT_LIMIT,
            reset_at: None,
        }
    }
}

/// Both quota windows read from one usage response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub session: QuotaWindow,
    pub weekly: QuotaWindow,
    pub fetched_at: DateTime<Utc>,
}

impl UsageSnapshot {
    pub fn window(&self, kind: WindowKind) -> &QuotaWindow {
        match kind {
            WindowKind::Session => &self.session,
            WindowKind::Weekly => &self.weekly,
        }
    }

    pub(crate) fn window_mut(&mut self, kind: WindowKind) -> &mut QuotaWindow {
        match kind {
            WindowKind::Session => &mut self.session,
            WindowKind::Weekly => &mut self.weekly,
        }
    }

    /// Highest percentage across both windows.
    pub fn worst_percent(&self) -> u32 {
        self.session.percent().max(self.weekly.percent())
    }
}
