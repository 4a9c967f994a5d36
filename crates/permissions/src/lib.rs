//! Tool permission engine.
//!
//! Every tool call the model makes is checked against an ordered list of
//! [`PermissionPolicy`] entries. The first entry whose tool pattern and
//! argument globs match decides; when nothing matches the answer is
//! [`Permission::Ask`].
//!
//! - `pattern`: `Name`, `*`-wildcard and `Name(argPattern)` parsing
//! - `checker`: first-match evaluation plus the Bash deny-list
//! - `defaults`: built-in and per-mode policy tables
//! - `precedence`: merging overrides, personal settings and defaults
//! - `file`: the persisted `allow`/`ask`/`exclude` YAML document
//! - `context`: the immutable [`PermissionContext`] threaded through a turn

pub mod checker;
pub mod context;
pub mod defaults;
pub mod file;
pub mod pattern;
pub mod policy;
pub mod precedence;

pub use checker::{check_tool_permission, CommandGuard};
pub use context::PermissionContext;
pub use file::PolicyFile;
pub use policy::{Permission, PermissionCheckResult, PermissionPolicy};
pub use precedence::resolve_precedence;
