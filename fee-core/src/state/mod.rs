//! Engine status, job results and fault taxonomy

pub mod error;
pub mod status;

pub use error::{ApiError, ApiId, RuntimeFault, MODULE_ID};
pub use status::{BlockStatus, JobResult, Status};
