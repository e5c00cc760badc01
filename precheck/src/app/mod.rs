//! Application layer

pub mod options;
pub mod run;
pub mod session;
