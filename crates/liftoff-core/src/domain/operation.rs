//! Long-running operations and their error codes.

use std::fmt;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::function::DesiredFunction;

/// `google.rpc.Code` values reported by completed operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum RpcCode {
    Ok,
    Cancelled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
    Other(i32),
}

impl RpcCode {
    /// Canonical retryable set: the operation may succeed if submitted again.
    pub const RETRYABLE: [RpcCode; 4] = [
        RpcCode::Cancelled,
        RpcCode::DeadlineExceeded,
        RpcCode::Aborted,
        RpcCode::Unavailable,
    ];

    pub fn is_retryable(self) -> bool {
        Self::RETRYABLE.contains(&self)
    }

    pub fn as_i32(self) -> i32 {
        i32::from(self)
    }

    fn as_str(self) -> &'static str {
        match self {
            RpcCode::Ok => "OK",
            RpcCode::Cancelled => "CANCELLED",
            RpcCode::Unknown => "UNKNOWN",
            RpcCode::InvalidArgument => "INVALID_ARGUMENT",
            RpcCode::DeadlineExceeded => "DEADLINE_EXCEEDED",
            RpcCode::NotFound => "NOT_FOUND",
            RpcCode::AlreadyExists => "ALREADY_EXISTS",
            RpcCode::PermissionDenied => "PERMISSION_DENIED",
            RpcCode::ResourceExhausted => "RESOURCE_EXHAUSTED",
            RpcCode::FailedPrecondition => "FAILED_PRECONDITION",
            RpcCode::Aborted => "ABORTED",
            RpcCode::OutOfRange => "OUT_OF_RANGE",
            RpcCode::Unimplemented => "UNIMPLEMENTED",
            RpcCode::Internal => "INTERNAL",
            RpcCode::Unavailable => "UNAVAILABLE",
            RpcCode::DataLoss => "DATA_LOSS",
            RpcCode::Unauthenticated => "UNAUTHENTICATED",
            RpcCode::Other(_) => "CODE",
        }
    }
}

impl From<i32> for RpcCode {
    fn from(code: i32) -> Self {
        match code {
            0 => RpcCode::Ok,
            1 => RpcCode::Cancelled,
            2 => RpcCode::Unknown,
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            6 => RpcCode::AlreadyExists,
            7 => RpcCode::PermissionDenied,
            8 => RpcCode::ResourceExhausted,
            9 => RpcCode::FailedPrecondition,
            10 => RpcCode::Aborted,
            11 => RpcCode::OutOfRange,
            12 => RpcCode::Unimplemented,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            15 => RpcCode::DataLoss,
            16 => RpcCode::Unauthenticated,
            other => RpcCode::Other(other),
        }
    }
}

impl From<RpcCode> for i32 {
    fn from(code: RpcCode) -> Self {
        match code {
            RpcCode::Ok => 0,
            RpcCode::Cancelled => 1,
            RpcCode::Unknown => 2,
            RpcCode::InvalidArgument => 3,
            RpcCode::DeadlineExceeded => 4,
            RpcCode::NotFound => 5,
            RpcCode::AlreadyExists => 6,
            RpcCode::PermissionDenied => 7,
            RpcCode::ResourceExhausted => 8,
            RpcCode::FailedPrecondition => 9,
            RpcCode::Aborted => 10,
            RpcCode::OutOfRange => 11,
            RpcCode::Unimplemented => 12,
            RpcCode::Internal => 13,
            RpcCode::Unavailable => 14,
            RpcCode::DataLoss => 15,
            RpcCode::Unauthenticated => 16,
            RpcCode::Other(code) => code,
        }
    }
}

impl fmt::Display for RpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.as_str(), self.as_i32())
    }
}

/// Error payload of a finished operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationError {
    pub code: RpcCode,

    #[serde(default)]
    pub message: String,
}

/// Backend view of an operation: `{name, done, error?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStatus {
    pub name: String,

    #[serde(default)]
    pub done: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<OperationError>,
}

impl OperationStatus {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        };
        f.write_str(kind)
    }
}

/// A mutation submitted to the functions backend. Kept so it can be sent
/// again when its operation fails with a retryable code.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionRequest {
    Create(DesiredFunction),
    Update(DesiredFunction),
    Delete { name: String },
}

impl FunctionRequest {
    pub fn target(&self) -> &str {
        match self {
            FunctionRequest::Create(function) | FunctionRequest::Update(function) => &function.name,
            FunctionRequest::Delete { name } => name,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self {
            FunctionRequest::Create(_) => OperationKind::Create,
            FunctionRequest::Update(_) => OperationKind::Update,
            FunctionRequest::Delete { .. } => OperationKind::Delete,
        }
    }
}

/// An in-flight operation tracked by the poller.
#[derive(Debug, Clone)]
pub struct Operation {
    pub request: FunctionRequest,
    pub status: OperationStatus,
    pub submitted_at: Instant,

    /// Times the request was sent again after a retryable failure.
    pub resubmits: u32,

    /// Consecutive status checks that failed at transport level.
    pub check_failures: u32,
}

impl Operation {
    pub fn new(request: FunctionRequest, status: OperationStatus) -> Self {
        Self {
            request,
            status,
            submitted_at: Instant::now(),
            resubmits: 0,
            check_failures: 0,
        }
    }

    pub fn target(&self) -> &str {
        self.request.target()
    }

    pub fn kind(&self) -> OperationKind {
        self.request.kind()
    }
}
