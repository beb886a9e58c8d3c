//! Capture of local state changes into the operation log

pub mod operation_capture;
pub mod validator;

pub use operation_capture::OperationCapture;
pub use validator::validate_operation_payload;
