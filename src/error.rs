//! Error handling for bluewhois

use std::time::Duration;

use thiserror::Error;

/// Broad classification used by callers to decide how to react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The input could not be normalized into a domain or IP
    InvalidTarget,
    /// Network, timeout or server-side failure; another source may succeed
    UpstreamUnavailable,
    /// An authoritative source answered that the target is not registered
    NotRegistered,
    /// An upstream answered with a payload we could not understand
    ParseFailure,
    /// The caller exceeded its request budget; no upstream call was made
    RateLimited,
    /// Local failure (configuration, storage, bugs)
    Internal,
}

/// Main error type for bluewhois
#[derive(Error, Debug, Clone)]
pub enum LookupError {
    #[error("Invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },

    #[error("Upstream unavailable ({source_name}): {message}")]
    Upstream {
        source_name: String,
        message: String,
        status_code: Option<u16>,
    },

    #[error("{target} is not registered: {message}")]
    NotRegistered { target: String, message: String },

    #[error("Parse error: {message}")]
    Parse {
        message: String,
        content: Option<String>,
    },

    #[error("Rate limit exceeded for bucket '{bucket}'")]
    RateLimited {
        bucket: String,
        retry_after: Option<u64>,
    },

    #[error("Timeout error: {operation} timed out after {timeout_secs}s")]
    Timeout {
        operation: String,
        timeout_secs: u64,
    },

    #[error("RDAP bootstrap unavailable for {category}: {message}")]
    BootstrapUnavailable { category: String, message: String },

    #[error("All lookup sources failed for '{target}': {details}")]
    Exhausted { target: String, details: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {message}")]
    Io {
        message: String,
        path: Option<String>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl LookupError {
    /// Create an invalid target error
    pub fn invalid_target(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create an upstream error for a named server or API
    pub fn upstream(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            source_name: source_name.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Create an upstream error carrying the HTTP status that caused it
    pub fn http_status(source_name: impl Into<String>, status_code: u16) -> Self {
        Self::Upstream {
            source_name: source_name.into(),
            message: format!("HTTP {status_code}"),
            status_code: Some(status_code),
        }
    }

    /// Create a not-registered error
    pub fn not_registered(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::NotRegistered {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(message: impl Into<String>, content: Option<String>) -> Self {
        Self::Parse {
            message: message.into(),
            content,
        }
    }

    /// Create a rate limit error
    pub fn rate_limited(bucket: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self::RateLimited {
            bucket: bucket.into(),
            retry_after,
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_secs,
        }
    }

    /// Create a bootstrap-unavailable error
    pub fn bootstrap_unavailable(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BootstrapUnavailable {
            category: category.into(),
            message: message.into(),
        }
    }

    /// Create the final error returned when every stage failed
    pub fn exhausted(target: impl Into<String>, details: impl Into<String>) -> Self {
        Self::Exhausted {
            target: target.into(),
            details: details.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an IO error
    pub fn io(message: impl Into<String>, path: Option<String>) -> Self {
        Self::Io {
            message: message.into(),
            path,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidTarget { .. } => ErrorKind::InvalidTarget,
            Self::Upstream { .. }
            | Self::Timeout { .. }
            | Self::BootstrapUnavailable { .. }
            | Self::Exhausted { .. } => ErrorKind::UpstreamUnavailable,
            Self::NotRegistered { .. } => ErrorKind::NotRegistered,
            Self::Parse { .. } => ErrorKind::ParseFailure,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Config { .. } | Self::Io { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the next candidate server or stage should be tried after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::UpstreamUnavailable | ErrorKind::ParseFailure
        )
    }

    /// Get user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::InvalidTarget { input, reason } => {
                format!("❌ '{}' is not a valid domain or IP address: {}\n💡 Try something like example.com or 1.1.1.1", input, reason)
            }
            Self::NotRegistered { target, .. } => {
                format!("🔍 {} is not registered (no public registration record found)", target)
            }
            Self::RateLimited { retry_after, .. } => {
                let retry = retry_after.map_or(String::new(), |s| format!(" Retry in {}s.", s));
                format!("⏱️  Too many requests.{}\n💡 Wait a moment before querying again", retry)
            }
            Self::Upstream { .. }
            | Self::Timeout { .. }
            | Self::BootstrapUnavailable { .. }
            | Self::Exhausted { .. } => {
                format!("⚠️  Registration data is temporarily unavailable: {}\n💡 Try again later or use --refresh", self)
            }
            Self::Parse { message, .. } => {
                format!("❌ Unexpected upstream response: {}\n💡 This might be a temporary issue, try again", message)
            }
            Self::Config { message } => {
                format!("❌ Configuration problem: {}\n💡 Check your .env file or environment", message)
            }
            Self::Io { message, path } => {
                let path_info = path.as_ref().map_or(String::new(), |p| format!(" ({})", p));
                format!("❌ File error{}: {}\n💡 Check cache directory permissions", path_info, message)
            }
            Self::Internal { message } => {
                format!("❌ Internal error: {}\n💡 This is a bug, please report it", message)
            }
        }
    }
}

impl LookupError {
    /// Convert a transport error; `timeout` is the limit the request ran under
    pub fn from_http(err: reqwest::Error, timeout: Duration) -> Self {
        let status_code = err.status().map(|s| s.as_u16());
        let source_name = err
            .url()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_else(|| "http".to_string());

        if err.is_timeout() {
            Self::timeout(format!("HTTP request to {source_name}"), timeout.as_secs())
        } else if err.is_connect() {
            Self::Upstream {
                source_name,
                message: "Connection failed".to_string(),
                status_code,
            }
        } else {
            Self::Upstream {
                source_name,
                message: err.to_string(),
                status_code,
            }
        }
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(err: serde_json::Error) -> Self {
        Self::parse(err.to_string(), None)
    }
}

impl From<std::io::Error> for LookupError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string(), None)
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, LookupError>;

/// Helper macros for common error patterns
#[macro_export]
macro_rules! invalid_target {
    ($input:expr, $msg:expr) => {
        $crate::error::LookupError::invalid_target($input, $msg)
    };
    ($input:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::error::LookupError::invalid_target($input, format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::LookupError::internal($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::LookupError::internal(format!($fmt, $($arg)*))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            LookupError::invalid_target("x", "bad").kind(),
            ErrorKind::InvalidTarget
        );
        assert_eq!(
            LookupError::not_registered("example.com", "404").kind(),
            ErrorKind::NotRegistered
        );
        assert_eq!(
            LookupError::timeout("WHOIS read", 15).kind(),
            ErrorKind::UpstreamUnavailable
        );
        assert_eq!(
            LookupError::parse("bad json", None).kind(),
            ErrorKind::ParseFailure
        );
    }

    #[tokio::test]
    async fn test_http_timeout_reports_callers_limit() {
        use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let err = client.get(server.uri()).send().await.unwrap_err();
        assert!(err.is_timeout());

        match LookupError::from_http(err, Duration::from_secs(7)) {
            LookupError::Timeout { timeout_secs, .. } => assert_eq!(timeout_secs, 7),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_retryable() {
        assert!(LookupError::upstream("rdap.example", "HTTP 500").is_retryable());
        assert!(LookupError::parse("bad json", None).is_retryable());
        assert!(!LookupError::not_registered("example.com", "404").is_retryable());
        assert!(!LookupError::rate_limited("api", Some(3)).is_retryable());
    }

    #[test]
    fn test_user_message_distinguishes_outcomes() {
        let missing = LookupError::not_registered("nope.com", "HTTP 404").user_message();
        let down = LookupError::exhausted("nope.com", "rdap: HTTP 503").user_message();
        assert!(missing.contains("not registered"));
        assert!(down.contains("temporarily unavailable"));
    }

    #[test]
    fn test_macros() {
        let err = invalid_target!("a b", "contains {}", "space");
        assert!(err.to_string().contains("contains space"));
        let err = internal_error!("boom");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
