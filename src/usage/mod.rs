//! Canonical quota readings and the normalizer that produces them.
//!
//! This module provides:
//! - `QuotaWindow` / `UsageSnapshot`, the shape-independent usage model
//! - `normalize`, which reads any of the known response layouts
//! - `safe_int`, the lenient integer parse the normalizer is built on

mod normalize;
mod types;

pub use normalize::{normalize, safe_int};
pub use types::{QuotaWindow, UsageSnapshot, WindowKind, DEFAULT_LIMIT};
