//! CLI command implementations

pub mod branch;
pub mod checkpoint;
pub mod config;
pub mod create;
pub mod delete;
pub mod log;
pub mod restore;
pub mod scan;
pub mod status;
