//! Error type for IPAM backend operations.

use thiserror::Error;

/// Category of a backend failure.
///
/// Remote fault codes and transport-level failures are collapsed into this
/// enum so that callers can branch on the category without knowing the
/// backend's numeric code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The referenced pool or prefix does not exist on the backend.
    NotFound,

    /// The backend rejected the operation as a duplicate.
    Duplicate,

    /// The backend rejected the request payload (missing, extraneous or
    /// malformed input).
    InvalidInput,

    /// The backend rejected the configured credentials.
    AuthFailed,

    /// The backend could not be reached or returned an unusable response.
    Transport,

    /// Any other backend-side failure (e.g. an exhausted pool).
    Generic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::NotFound => "not-found",
            ErrorKind::Duplicate => "duplicate",
            ErrorKind::InvalidInput => "invalid-input",
            ErrorKind::AuthFailed => "auth-failed",
            ErrorKind::Transport => "transport",
            ErrorKind::Generic => "generic",
        };
        write!(f, "{s}")
    }
}

/// A failure reported by (or on the way to) the IPAM backend.
#[derive(Debug, Clone, Error)]
#[error("{message} ({kind}{})", .code.map(|c| format!(", remote code {c}")).unwrap_or_default())]
pub struct IpamError {
    /// Failure category.
    pub kind: ErrorKind,

    /// Numeric fault code from the backend, if the failure was remote.
    pub code: Option<i64>,

    /// Human-readable message.
    pub message: String,
}

impl IpamError {
    /// Create an error without a remote fault code.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Create a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, message)
    }

    /// Map a remote fault code to a tagged error.
    ///
    /// Fault code table: 1000 generic, 1100/1110/1120 input, 1200 value,
    /// 1300 non-existent, 1400 duplicate.
    pub fn from_fault(code: i64, message: impl Into<String>) -> Self {
        let kind = match code {
            1300 => ErrorKind::NotFound,
            1400 => ErrorKind::Duplicate,
            1100 | 1110 | 1120 | 1200 => ErrorKind::InvalidInput,
            _ => ErrorKind::Generic,
        };
        Self {
            kind,
            code: Some(code),
            message: message.into(),
        }
    }

    /// Returns true if the failure means the resource is already gone.
    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(1300, ErrorKind::NotFound)]
    #[case(1400, ErrorKind::Duplicate)]
    #[case(1100, ErrorKind::InvalidInput)]
    #[case(1110, ErrorKind::InvalidInput)]
    #[case(1120, ErrorKind::InvalidInput)]
    #[case(1200, ErrorKind::InvalidInput)]
    #[case(1000, ErrorKind::Generic)]
    #[case(9999, ErrorKind::Generic)]
    fn test_fault_code_mapping(#[case] code: i64, #[case] expected: ErrorKind) {
        let err = IpamError::from_fault(code, "boom");
        assert_eq!(err.kind, expected);
        assert_eq!(err.code, Some(code));
    }

    #[test]
    fn test_display_includes_code_when_present() {
        let err = IpamError::from_fault(1300, "no such prefix");
        assert_eq!(err.to_string(), "no such prefix (not-found, remote code 1300)");

        let err = IpamError::transport("connection refused");
        assert_eq!(err.to_string(), "connection refused (transport)");
    }
}
