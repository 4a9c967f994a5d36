//! Isolated workers for `check` and `review`.
//!
//! Each task gets a private git worktree and its own child process (the
//! same binary in worker mode). The child runs one headless agent loop and
//! reports the patch it produced; the parent collects results.
//!
//! - `git`: git CLI wrappers, base resolution, [`DiffContext`], patch apply
//! - `worktree`: worktree lifecycle and baseline diffs
//! - `agents`: markdown agent definitions and discovery
//! - `prompt`: the bounded worker prompt
//! - `protocol`: JSON-lines messages between parent and worker
//! - `child`: the worker side ([`serve`])
//! - `orchestrator`: the parent side ([`Orchestrator`])

pub mod agents;
pub mod child;
pub mod git;
pub mod orchestrator;
pub mod prompt;
pub mod protocol;
pub mod worktree;

pub use agents::AgentSource;
pub use child::{serve, AgentRunner};
pub use git::DiffContext;
pub use orchestrator::{Orchestrator, WorkerTask, INTERNAL_WORKER_FLAG};
pub use protocol::{TaskStatus, WorkerKind, WorkerOptions, WorkerResult, WorkerRunConfig};
pub use worktree::Worktree;
