//! Domain model (files, functions, operations, reports).

pub mod file_entry;
pub mod function;
pub mod operation;
pub mod report;

pub use file_entry::FileEntry;
pub use function::{DesiredFunction, ExistingFunction, FunctionTrigger, HttpsTrigger, IamPolicy};
pub use operation::{
    FunctionRequest, Operation, OperationError, OperationKind, OperationStatus, RpcCode,
};
pub use report::{DeployReport, OperationFailure, OperationSuccess, PollReport};
