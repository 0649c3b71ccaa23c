use crate::CoreError;
use thiserror::Error;
use warden_native::{lookup, ErrorKind, NativeHandle};

/// A failure reported by a native handle.
///
/// `code` and `message` are exactly what the handle reported through its
/// last-exception pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error {code}: {message}")]
pub struct NativeError {
    pub kind: ErrorKind,
    pub code: i64,
    pub message: String,
}

impl NativeError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: classify(code),
            code,
            message: message.into(),
        }
    }
}

/// Map a native status code to its error kind. Unlisted codes are `Generic`.
pub fn classify(code: i64) -> ErrorKind {
    lookup(code).unwrap_or(ErrorKind::Generic)
}

/// Turn a native status code into a typed error.
///
/// `0` is success. Any other value is replaced by the handle's last exception
/// code and message; if the handle reports no exception code, the returned
/// status code is kept.
pub fn handle_return_code<H>(code: i64, handle: &H) -> Result<(), CoreError>
where
    H: NativeHandle + ?Sized,
{
    if code == 0 {
        return Ok(());
    }
    let last_code = handle.last_exception_code();
    let code = if last_code == 0 { code } else { last_code };
    let message = handle.last_exception();
    handle.clear_last_exception();
    Err(CoreError::Native(NativeError::new(code, message)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_native::{codes, HandleKind};

    struct FailingHandle {
        code: i64,
        message: &'static str,
    }

    impl NativeHandle for FailingHandle {
        fn kind(&self) -> HandleKind {
            HandleKind::Product
        }
        fn init(&self, _: &str, _: &str, _: bool) -> i64 {
            0
        }
        fn destroy(&self) -> i64 {
            0
        }
        fn last_exception_code(&self) -> i64 {
            self.code
        }
        fn last_exception(&self) -> String {
            self.message.to_owned()
        }
        fn clear_last_exception(&self) {}
    }

    #[test]
    fn classify_is_total() {
        assert_eq!(classify(codes::UNKNOWN_RECORD), ErrorKind::NotFound);
        assert_eq!(
            classify(codes::UNKNOWN_DATA_SOURCE),
            ErrorKind::UnknownDataSource
        );
        assert_eq!(classify(codes::INVALID_JSON), ErrorKind::BadInput);
        for code in [-7, 1, 8, 999, 5000, 123_456] {
            assert_eq!(classify(code), ErrorKind::Generic, "code {code}");
        }
    }

    #[test]
    fn zero_is_success() {
        let handle = FailingHandle {
            code: 33,
            message: "ignored",
        };
        assert!(handle_return_code(0, &handle).is_ok());
    }

    #[test]
    fn failure_preserves_code_and_message() {
        let handle = FailingHandle {
            code: 23,
            message: "0023E|Unknown DATA_SOURCE value 'X'",
        };
        let err = handle_return_code(-2, &handle).unwrap_err();
        match err {
            CoreError::Native(native) => {
                assert_eq!(native.kind, ErrorKind::UnknownDataSource);
                assert_eq!(native.code, 23);
                assert_eq!(native.message, "0023E|Unknown DATA_SOURCE value 'X'");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_exception_code_keeps_status() {
        let handle = FailingHandle {
            code: 0,
            message: "",
        };
        let err = handle_return_code(7424, &handle).unwrap_err();
        assert_eq!(err.kind(), Some(ErrorKind::Retryable));
        assert_eq!(err.native_code(), Some(7424));
    }
}
