//! # Supervisor and worker control plane
//!
//! A single privileged supervisor owns every destructive package-manager operation. Processes it
//! starts, directly or through the build tool, inherit the write end of a pipe on a well-known
//! descriptor and a per-run secret. When one of them runs maw again it becomes a worker, and
//! delegates its privileged requests to the supervisor over that pipe, one line per message:
//!
//! ```text
//! <pid>:<secret>:<action>:<param>\n
//! ```
//!
//! The supervisor acknowledges each request by signalling the worker directly.
pub mod message;
pub mod notify;
pub mod reader;
pub mod spawner;
pub mod supervisor;
pub mod worker;
