// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types for the RPC core.
//!
//! Transport and protocol failures are wrapped into a single [`RpcError`]
//! carrying a numeric framework code and an optional business sub-code.
//! Errors travel inside the [`Response`](crate::cluster::Response) error
//! slot rather than being thrown across async boundaries: a caller awaiting
//! a completion observes the error as a normal result inspection.

use std::fmt;
use std::io;

/// Result type for RPC operations.
pub type RpcResult<T> = Result<T, RpcError>;

/// Numeric framework error codes.
///
/// Business-level failures are not framework errors: they ride the
/// function-return-code field of a decoded response header and surface as
/// [`ErrorCode::Business`] with a `func_ret` sub-code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    /// Malformed magic or truncated/inconsistent frame.
    FrameDecode = 1,
    /// Server failed to parse an inbound request header.
    ServerDecode = 2,
    /// Client failed to parse an inbound response header.
    ClientDecode = 3,
    /// Body signature did not verify. Terminal, never retried.
    SignatureVerify = 4,
    /// No selector registered or no instance resolved. Configuration-class.
    Router = 11,
    /// Full-link timeout budget exhausted before dispatch.
    LinkTimeout = 21,
    /// Per-call deadline exceeded waiting for the response.
    ClientTimeout = 22,
    /// Worker queue saturated.
    Overload = 31,
    /// Connection closed while the call was in flight.
    ConnectionClosed = 32,
    /// Method not present in the service dispatch table.
    UnknownInvoke = 41,
    /// Invocation precondition violated (blank service/method, bad context).
    InvalidArgument = 42,
    /// Catch-all for unexpected failures crossing component boundaries.
    Unknown = 99,
    /// Application-level failure carried in the func-return-code field.
    Business = 100,
}

impl ErrorCode {
    /// Numeric wire representation of this code.
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a wire return code back to a framework code.
    ///
    /// Unrecognized codes collapse to [`ErrorCode::Unknown`] so that a
    /// newer peer never crashes an older decoder.
    pub fn from_i32(code: i32) -> Self {
        match code {
            1 => ErrorCode::FrameDecode,
            2 => ErrorCode::ServerDecode,
            3 => ErrorCode::ClientDecode,
            4 => ErrorCode::SignatureVerify,
            11 => ErrorCode::Router,
            21 => ErrorCode::LinkTimeout,
            22 => ErrorCode::ClientTimeout,
            31 => ErrorCode::Overload,
            32 => ErrorCode::ConnectionClosed,
            41 => ErrorCode::UnknownInvoke,
            42 => ErrorCode::InvalidArgument,
            100 => ErrorCode::Business,
            _ => ErrorCode::Unknown,
        }
    }
}

/// Unified error for the RPC core.
///
/// Carries a framework [`ErrorCode`], a human-readable message, and for
/// business failures the function return code reported by the callee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    code: ErrorCode,
    message: String,
    func_ret: Option<i32>,
}

impl RpcError {
    /// Create an error with a framework code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            func_ret: None,
        }
    }

    /// Create a business error carrying the callee's function return code.
    pub fn business(func_ret: i32, message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Business,
            message: message.into(),
            func_ret: Some(func_ret),
        }
    }

    /// Framework error code.
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    /// Error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Business function return code, if any.
    pub fn func_ret(&self) -> Option<i32> {
        self.func_ret
    }

    /// Whether this is a timeout-class error (link or per-call).
    pub fn is_timeout(&self) -> bool {
        matches!(self.code, ErrorCode::LinkTimeout | ErrorCode::ClientTimeout)
    }

    /// Whether the error counts as circuit-breaker signal when reported
    /// to the selector.
    pub fn is_breaker_eligible(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ClientTimeout | ErrorCode::ConnectionClosed | ErrorCode::Overload
        )
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.func_ret {
            Some(func_ret) => write!(
                f,
                "rpc error code {} func_ret {}: {}",
                self.code.as_i32(),
                func_ret,
                self.message
            ),
            None => write!(f, "rpc error code {}: {}", self.code.as_i32(), self.message),
        }
    }
}

impl std::error::Error for RpcError {}

impl From<io::Error> for RpcError {
    fn from(e: io::Error) -> Self {
        RpcError::new(ErrorCode::ConnectionClosed, e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for code in [
            ErrorCode::FrameDecode,
            ErrorCode::ServerDecode,
            ErrorCode::ClientDecode,
            ErrorCode::SignatureVerify,
            ErrorCode::Router,
            ErrorCode::LinkTimeout,
            ErrorCode::ClientTimeout,
            ErrorCode::Overload,
            ErrorCode::ConnectionClosed,
            ErrorCode::UnknownInvoke,
            ErrorCode::InvalidArgument,
            ErrorCode::Business,
        ] {
            assert_eq!(ErrorCode::from_i32(code.as_i32()), code);
        }
        assert_eq!(ErrorCode::from_i32(-7), ErrorCode::Unknown);
    }

    #[test]
    fn test_display_includes_code() {
        let err = RpcError::new(ErrorCode::Router, "no selector registered");
        assert!(err.to_string().contains("code 11"));
        assert!(err.to_string().contains("no selector registered"));
    }

    #[test]
    fn test_business_error_carries_func_ret() {
        let err = RpcError::business(1004, "insufficient balance");
        assert_eq!(err.code(), ErrorCode::Business);
        assert_eq!(err.func_ret(), Some(1004));
        assert!(err.to_string().contains("func_ret 1004"));
    }

    #[test]
    fn test_timeout_classification() {
        assert!(RpcError::new(ErrorCode::LinkTimeout, "").is_timeout());
        assert!(RpcError::new(ErrorCode::ClientTimeout, "").is_timeout());
        assert!(!RpcError::new(ErrorCode::Router, "").is_timeout());
    }
}
