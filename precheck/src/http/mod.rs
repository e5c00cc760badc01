//! Remote pool access over JSON-RPC

pub mod client;
pub mod pool;

pub use client::JsonRpcClient;
pub use pool::XenApiService;
