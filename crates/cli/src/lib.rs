//! SerialCode: a terminal coding agent.
//!
//! - `services`: the session's service graph (config, credentials,
//!   provider, model, permissions, jobs)
//! - `runtime`: the tool-calling agent loop
//! - `cli`: commands (`chat`, `run`, `check`, `review`, `config`) and the
//!   internal worker entry point

pub mod cli;
pub mod runtime;
pub mod services;
