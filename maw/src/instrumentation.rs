//! Tools and configuration to report what maw is doing.
pub mod logs;
