//! # maw library
//!
//! Resolves package names that the package manager cannot find in its repositories, building
//! them from source bundles when needed, and serializes every privileged package-manager
//! operation through a single supervisor process. The `maw` binary consumes this library.

pub mod aur;
pub mod cli;
pub mod config;
pub mod defaults;
pub mod event;
pub mod fetch;
pub mod http;
pub mod instrumentation;
pub mod ipc;
pub mod operations;
pub mod package;
pub mod pacman;
pub mod utils;
