use serde::{Deserialize, Serialize};

/// Failure family a native status code belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    BadInput,
    NotFound,
    UnknownDataSource,
    Configuration,
    ReplaceConflict,
    Retryable,
    Database,
    License,
    NotInitialized,
    Generic,
}

impl ErrorKind {
    /// `NotFound` and `UnknownDataSource` are refinements of bad input.
    pub fn is_bad_input(self) -> bool {
        matches!(
            self,
            ErrorKind::BadInput | ErrorKind::NotFound | ErrorKind::UnknownDataSource
        )
    }

    /// Failures the native engine cannot recover from without a restart.
    pub fn is_unrecoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::Database | ErrorKind::License | ErrorKind::NotInitialized
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::BadInput => write!(f, "bad input"),
            ErrorKind::NotFound => write!(f, "not found"),
            ErrorKind::UnknownDataSource => write!(f, "unknown data source"),
            ErrorKind::Configuration => write!(f, "configuration"),
            ErrorKind::ReplaceConflict => write!(f, "replace conflict"),
            ErrorKind::Retryable => write!(f, "retryable"),
            ErrorKind::Database => write!(f, "database"),
            ErrorKind::License => write!(f, "license"),
            ErrorKind::NotInitialized => write!(f, "not initialized"),
            ErrorKind::Generic => write!(f, "generic"),
        }
    }
}

/// Status codes raised by the native engine.
pub mod codes {
    pub const INVALID_JSON: i64 = 2;
    pub const INVALID_ARGUMENT: i64 = 3;
    pub const MISSING_FIELD: i64 = 7;
    pub const DUPLICATE_DATA_SOURCE: i64 = 22;
    pub const UNKNOWN_DATA_SOURCE: i64 = 23;
    pub const UNKNOWN_RECORD: i64 = 33;
    pub const UNKNOWN_FEATURE: i64 = 36;
    pub const NOT_INITIALIZED: i64 = 48;
    pub const ALREADY_INITIALIZED: i64 = 49;
    pub const REPOSITORY_LOCK: i64 = 1001;
    pub const UNKNOWN_CONFIG_HANDLE: i64 = 3121;
    pub const NO_DEFAULT_CONFIG: i64 = 7220;
    pub const UNKNOWN_CONFIG_ID: i64 = 7221;
    pub const INVALID_SETTINGS: i64 = 7226;
    pub const REPLACE_CONFLICT: i64 = 7245;
    pub const CONNECTION_LOST: i64 = 7424;
    pub const LICENSE_EXCEEDED: i64 = 9000;
}

/// Inclusive code ranges and the kind they map to. Ranges never overlap.
pub const CODE_RANGES: &[(i64, i64, ErrorKind)] = &[
    (2, 7, ErrorKind::BadInput),
    (22, 22, ErrorKind::BadInput),
    (23, 27, ErrorKind::UnknownDataSource),
    (33, 37, ErrorKind::NotFound),
    (48, 50, ErrorKind::NotInitialized),
    (53, 53, ErrorKind::NotInitialized),
    (1000, 1999, ErrorKind::Database),
    (2207, 2209, ErrorKind::UnknownDataSource),
    (3121, 3121, ErrorKind::BadInput),
    (7220, 7228, ErrorKind::Configuration),
    (7245, 7245, ErrorKind::ReplaceConflict),
    (7400, 7499, ErrorKind::Retryable),
    (9000, 9099, ErrorKind::License),
];

/// Look up the catalog entry for a status code.
pub fn lookup(code: i64) -> Option<ErrorKind> {
    CODE_RANGES
        .iter()
        .find(|(lo, hi, _)| (*lo..=*hi).contains(&code))
        .map(|(_, _, kind)| *kind)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ranges_are_sorted_and_disjoint() {
        for pair in CODE_RANGES.windows(2) {
            let (_, prev_hi, _) = pair[0];
            let (next_lo, next_hi, _) = pair[1];
            assert!(prev_hi < next_lo, "{pair:?} overlap or are unsorted");
            assert!(next_lo <= next_hi);
        }
    }

    #[test]
    fn named_codes_are_catalogued() {
        assert_eq!(lookup(codes::INVALID_JSON), Some(ErrorKind::BadInput));
        assert_eq!(
            lookup(codes::UNKNOWN_DATA_SOURCE),
            Some(ErrorKind::UnknownDataSource)
        );
        assert_eq!(lookup(codes::UNKNOWN_RECORD), Some(ErrorKind::NotFound));
        assert_eq!(lookup(codes::UNKNOWN_FEATURE), Some(ErrorKind::NotFound));
        assert_eq!(
            lookup(codes::NOT_INITIALIZED),
            Some(ErrorKind::NotInitialized)
        );
        assert_eq!(
            lookup(codes::UNKNOWN_CONFIG_ID),
            Some(ErrorKind::Configuration)
        );
        assert_eq!(
            lookup(codes::REPLACE_CONFLICT),
            Some(ErrorKind::ReplaceConflict)
        );
        assert_eq!(lookup(codes::CONNECTION_LOST), Some(ErrorKind::Retryable));
        assert_eq!(lookup(codes::LICENSE_EXCEEDED), Some(ErrorKind::License));
    }

    #[test]
    fn unlisted_codes_have_no_entry() {
        assert_eq!(lookup(0), None);
        assert_eq!(lookup(-1), None);
        assert_eq!(lookup(8000), None);
    }

    #[test]
    fn bad_input_family() {
        assert!(ErrorKind::NotFound.is_bad_input());
        assert!(ErrorKind::UnknownDataSource.is_bad_input());
        assert!(!ErrorKind::Configuration.is_bad_input());
        assert!(ErrorKind::Database.is_unrecoverable());
    }
}
