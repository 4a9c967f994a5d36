//! Built-in tools for SerialCode.
//!
//! - `file_ops`: Read / Write / Edit / List / Search inside the workspace
//! - `exec`: the Bash tool, foreground with auto-detach after `yield_ms`
//! - `jobs`: the background job manager behind Bash
//! - `job_tools`: JobOutput / JobCancel
//! - `truncate`: tail-preserving output truncation

pub mod exec;
pub mod file_ops;
pub mod job_tools;
pub mod jobs;
pub mod truncate;

pub use jobs::{JobManager, JobSnapshot, JobStatus};
pub use truncate::{truncate_output_from_start, TruncatedOutput};
