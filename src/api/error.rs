/// Errors that end a poll cycle.
///
/// None of these are fatal: the scheduler shows the message and retries
/// after a fixed backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// No credential configured; no request was sent
    NoCredential,
    /// HTTP 401/403: the credential is invalid or expired
    AuthFailed,
    /// Any other non-2xx status
    HttpError(u16),
    /// Body was not valid JSON
    InvalidResponse(String),
    /// Transport failure (DNS, TLS, timeout, connection reset)
    NetworkError(String),
    /// Account response carried no organization identifier
    OrganizationNotFound,
    /// Usage body was JSON but not something the normalizer can read
    ParseError(String),
}

impl FetchError {
    /// Short category name for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NoCredential => "no_credential",
            FetchError::AuthFailed => "auth",
            FetchError::HttpError(_) => "http",
            FetchError::InvalidResponse(_) => "invalid_response",
            FetchError::NetworkError(_) => "network",
            FetchError::OrganizationNotFound => "organization",
            FetchError::ParseError(_) => "parse",
        }
    }
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::NoCredential => write!(
                f,
                "No session key configured. Set USAGE_PANEL_SESSION_KEY or store one in the keyring."
            ),
            FetchError::AuthFailed => {
                write!(f, "Authentication failed: session key is invalid or expired")
            }
            FetchError::HttpError(status) => write!(f, "Usage API error (HTTP {})", status),
            FetchError::InvalidResponse(e) => write!(f, "Invalid response from usage API: {}", e),
            FetchError::NetworkError(e) => write!(f, "Network error: {}", e),
            FetchError::OrganizationNotFound => {
                write!(f, "Could not find an organization for this account")
            }
            FetchError::ParseError(e) => write!(f, "Failed to read usage data: {}", e),
        }
    }
}

impl std::error::Error for FetchError {}
