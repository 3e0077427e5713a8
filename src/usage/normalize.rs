//! Lenient multi-schema parser for rate-limit status responses.
//!
//! The upstream response shape is undocumented and has been seen in at least
//! three layouts. Each layout is described by a rule table below and applied
//! in a fixed order; a later rule only fills window fields an earlier rule
//! left at their default. Nothing in here fails: missing or malformed values
//! read as zero.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::types::{QuotaWindow, UsageSnapshot, WindowKind};

/// Substrings (after folding to lowercase alphanumerics) naming the short window.
const FIVE_HOUR_MARKERS: &[&str] = &["5hour", "5hr", "fivehour"];
/// Substrings naming the weekly window.
const WEEK_MARKERS: &[&str] = &["week", "7day", "sevenday"];
/// Generic marker that also maps to the short window in list entries.
const GENERIC_WINDOW_MARKER: &str = "window";

/// A list-shaped layout: where to find the entries, how to tell which window
/// an entry describes, and how to read it.
struct ListSchema {
    name: &'static str,
    containers: &'static [&'static str],
    kind_keys: &'static [&'static str],
    read: fn(&Map<String, Value>) -> Reading,
}

/// Values pulled from one entry. `limit == 0` means "not present".
#[derive(Debug)]
struct Reading {
    used: u64,
    limit: u64,
    reset_at: Option<String>,
}

/// Rate-limit status object: `remaining` out of `total` per window entry.
const RATE_LIMIT_STATUS: ListSchema = ListSchema {
    name: "rate_limit_status",
    containers: &["rate_limit_status", "rateLimitStatus"],
    kind_keys: &["type", "window_type", "windowType"],
    read: read_remaining_entry,
};

/// Flat quota list: `used` against `limit` per item.
const QUOTA_LIST: ListSchema = ListSchema {
    name: "quota_list",
    containers: &["quotas", "limits", "usage_limits"],
    kind_keys: &["window", "type", "period"],
    read: read_used_entry,
};

const LIST_SCHEMAS: [&ListSchema; 2] = [&RATE_LIMIT_STATUS, &QUOTA_LIST];

const REMAINING_KEYS: &[&str] = &["remaining", "tokens_remaining"];
const TOTAL_KEYS: &[&str] = &["total", "tokens_total", "limit"];
const STATUS_RESET_KEYS: &[&str] = &["resetsAt", "reset_at", "resets_at"];

const USED_KEYS: &[&str] = &["used", "tokens_used"];
const LIMIT_KEYS: &[&str] = &["limit", "tokens_limit", "total"];
const LIST_RESET_KEYS: &[&str] = &["reset_at", "resetsAt"];

/// Normalize a usage payload into a snapshot stamped with `fetched_at`.
///
/// Windows nothing could be read for come back as `used = 0, limit = 1,
/// reset_at = None`.
pub fn normalize(payload: &Value, fetched_at: DateTime<Utc>) -> UsageSnapshot {
    let mut snapshot = UsageSnapshot {
        session: QuotaWindow::default(),
        weekly: QuotaWindow::default(),
        fetched_at,
    };

    let Some(root) = payload.as_object() else {
        log::debug!("Normalize: payload is not an object, using defaults");
        return snapshot;
    };

    for schema in LIST_SCHEMAS {
        apply_list_schema(schema, root, &mut snapshot);
    }

    // Flat keys only reach windows the list layouts left without a limit
    let open: Vec<WindowKind> = [WindowKind::Session, WindowKind::Weekly]
        .into_iter()
        .filter(|kind| !snapshot.window(*kind).has_limit())
        .collect();
    if !open.is_empty() {
        apply_flat_keys(root, &open, &mut snapshot);
    }

    snapshot
}

/// Lenient integer parse.
///
/// Numbers are truncated toward zero; strings yield their leading integer
/// (`"123.7"` is 123, `"42px"` is 42); everything else, including `null`,
/// a missing value, and non-finite numbers, is 0.
pub fn safe_int(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => {
            if let Some(i) = n.as_i64() {
                i
            } else if n.as_u64().is_some() {
                i64::MAX
            } else {
                n.as_f64()
                    .filter(|f| f.is_finite())
                    .map(|f| f.trunc() as i64)
                    .unwrap_or(0)
            }
        }
        Some(Value::String(s)) => parse_leading_int(s),
        _ => 0,
    }
}

fn parse_leading_int(s: &str) -> i64 {
    let s = s.trim_start();
    let (negative, digits) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let mut value: i64 = 0;
    let mut seen_digit = false;
    for b in digits.bytes() {
        if !b.is_ascii_digit() {
            break;
        }
        seen_digit = true;
        value = value.saturating_mul(10).saturating_add(i64::from(b - b'0'));
    }

    if !seen_digit {
        0
    } else if negative {
        -value
    } else {
        value
    }
}

/// Classify a label into a window kind. List entries may use the generic
/// "window" marker for the short window; flat keys may not.
fn classify(label: &str, allow_generic: bool) -> Option<WindowKind> {
    let folded: String = label
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect();

    if FIVE_HOUR_MARKERS.iter().any(|m| folded.contains(m)) {
        Some(WindowKind::Session)
    } else if WEEK_MARKERS.iter().any(|m| folded.contains(m)) {
        Some(WindowKind::Weekly)
    } else if allow_generic && folded.contains(GENERIC_WINDOW_MARKER) {
        Some(WindowKind::Session)
    } else {
        None
    }
}

fn apply_list_schema(schema: &ListSchema, root: &Map<String, Value>, snapshot: &mut UsageSnapshot) {
    for container in schema.containers {
        let Some(value) = root.get(*container) else {
            continue;
        };

        for entry in entries_of(value, schema.kind_keys) {
            let Some(kind) = first_string(entry, schema.kind_keys)
                .and_then(|label| classify(label, true))
            else {
                continue;
            };

            let reading = (schema.read)(entry);
            log::debug!(
                "Normalize: {} entry for {} -> used={}, limit={}",
                schema.name,
                kind.label(),
                reading.used,
                reading.limit
            );
            fill(snapshot.window_mut(kind), reading);
        }
    }
}

/// Entries of a container: array items, a single entry object, or the
/// values of an object-of-objects in payload order.
fn entries_of<'a>(value: &'a Value, kind_keys: &[&str]) -> Vec<&'a Map<String, Value>> {
    match value {
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        Value::Object(map) if kind_keys.iter().any(|k| map.contains_key(*k)) => vec![map],
        Value::Object(map) => map.values().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

fn read_remaining_entry(entry: &Map<String, Value>) -> Reading {
    let remaining = to_count(safe_int(first_present(entry, REMAINING_KEYS)));
    let total = to_count(safe_int(first_present(entry, TOTAL_KEYS)));
    Reading {
        used: total.saturating_sub(remaining),
        limit: total,
        reset_at: first_timestamp(entry, STATUS_RESET_KEYS),
    }
}

fn read_used_entry(entry: &Map<String, Value>) -> Reading {
    Reading {
        used: to_count(safe_int(first_present(entry, USED_KEYS))),
        limit: to_count(safe_int(first_present(entry, LIMIT_KEYS))),
        reset_at: first_timestamp(entry, LIST_RESET_KEYS),
    }
}

/// Fallback: `five_hour_used`, `weekly_limit`, ... as top-level keys.
/// Keys for windows outside `open` are ignored.
fn apply_flat_keys(root: &Map<String, Value>, open: &[WindowKind], snapshot: &mut UsageSnapshot) {
    for (key, value) in root {
        let Some(kind) = classify(key, false).filter(|kind| open.contains(kind)) else {
            continue;
        };
        let lower = key.to_ascii_lowercase();
        let window = snapshot.window_mut(kind);
        let n = to_count(safe_int(Some(value)));

        if lower.contains("used") {
            if !window.has_used() {
                window.used = n;
            }
        } else if (lower.contains("limit") || lower.contains("total")) && !window.has_limit() && n > 0 {
            window.limit = n;
        }
    }
}

/// A window with a limit already has its `used` from the same entry, even
/// when that is zero.
fn fill(window: &mut QuotaWindow, reading: Reading) {
    if !window.has_used() && !window.has_limit() {
        window.used = reading.used;
    }
    if !window.has_limit() && reading.limit > 0 {
        window.limit = reading.limit;
    }
    if window.reset_at.is_none() {
        window.reset_at = reading.reset_at;
    }
}

fn to_count(n: i64) -> u64 {
    n.max(0) as u64
}

fn first_present<'a>(entry: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| entry.get(*k))
        .find(|v| !v.is_null())
}

fn first_string<'a>(entry: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter().filter_map(|k| entry.get(*k)).find_map(Value::as_str)
}

fn first_timestamp(entry: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    match first_present(entry, keys)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
