//! Classification of remote key-management failures.
//!
//! Turns an opaque [`KmsError`] into an [`ErrorCategory`] that tells the
//! health surfaces whether a restart could plausibly help.

use crate::kms::KmsError;
use std::fmt;

/// Codes caused by key or grant administration, never fixed by a restart.
const USER_INDUCED_CODES: &[&str] = &[
    "DisabledException",
    "KMSInvalidStateException",
    "KeyUnavailableException",
    "InvalidArnException",
    "InvalidGrantIdException",
    "InvalidGrantTokenException",
];

/// Request quota codes.
const QUOTA_CODES: &[&str] = &["LimitExceededException", "RequestLimitExceeded"];

const INVALID_CIPHERTEXT_CODE: &str = "InvalidCiphertextException";
const ACCESS_DENIED_CODE: &str = "AccessDeniedException";
const INTERNAL_CODE: &str = "KMSInternalException";

/// Access-denied messages that really mean the key does not exist.
const KEY_NOT_FOUND_PHRASES: &[&str] = &[
    "customer master key that does not exist",
    "the resource does not exist in this Region",
];

const XKS_PROXY_TIMEOUT_PHRASE: &str = "external key store proxy did not respond in time";

/// Category of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// No error.
    Nil,
    /// Administrator-caused, not fixable by restart.
    UserInduced,
    /// Service-side rate limiting.
    Throttled,
    /// Ciphertext invalid, tampered with or encrypted under another key.
    Corruption,
    /// Anything unclassified.
    Other,
}

impl ErrorCategory {
    /// Stable label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::UserInduced => "user_induced",
            Self::Throttled => "throttled",
            Self::Corruption => "corruption",
            Self::Other => "other",
        }
    }

    /// Whether a failure of this category should fail the liveness probe.
    #[must_use]
    pub const fn fails_liveness(&self) -> bool {
        !matches!(self, Self::Nil | Self::UserInduced)
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a remote failure. `None` means the call succeeded.
///
/// Only the structured code and message are inspected. A [`KmsError::Other`]
/// is always [`ErrorCategory::Other`], even if its text names a known code.
#[must_use]
pub fn classify(err: Option<&KmsError>, is_customer_managed_key: bool) -> ErrorCategory {
    let Some(err) = err else {
        return ErrorCategory::Nil;
    };
    let Some(code) = err.code() else {
        return ErrorCategory::Other;
    };

    if USER_INDUCED_CODES.contains(&code) {
        return ErrorCategory::UserInduced;
    }

    // Quota on a customer managed key is set by its owner
    if QUOTA_CODES.contains(&code) {
        return if is_customer_managed_key {
            ErrorCategory::UserInduced
        } else {
            ErrorCategory::Throttled
        };
    }

    let message = err.message();
    match code {
        INVALID_CIPHERTEXT_CODE => ErrorCategory::Corruption,
        ACCESS_DENIED_CODE if KEY_NOT_FOUND_PHRASES.iter().any(|p| message.contains(p)) => {
            ErrorCategory::UserInduced
        }
        INTERNAL_CODE if message.contains(XKS_PROXY_TIMEOUT_PHRASE) => ErrorCategory::UserInduced,
        _ => ErrorCategory::Other,
    }
}
