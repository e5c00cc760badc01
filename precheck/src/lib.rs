//! Patch Precheck Library
//!
//! Precheck, remediation and apply engine for rolling updates across
//! hypervisor pools.

pub mod actions;
pub mod app;
pub mod checks;
pub mod engine;
pub mod errors;
pub mod http;
pub mod logs;
pub mod models;
pub mod plan;
pub mod problems;
pub mod remediation;
pub mod service;
pub mod storage;
pub mod utils;
