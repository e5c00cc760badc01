//! Wire models for the pool management JSON-RPC API

pub mod models;

pub use models::*;
