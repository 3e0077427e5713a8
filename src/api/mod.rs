//! Usage service API: authenticated fetches, organization lookup, and the
//! error taxonomy for a poll cycle.
//!
//! The credential is an opaque session token sent as a cookie.

mod client;
mod error;
mod identity;

pub use client::{session_cookie, ApiClient, DEFAULT_BASE_URL};
pub use error::FetchError;
pub use identity::extract_organization_id;
