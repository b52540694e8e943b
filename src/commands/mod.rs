//! Command implementations, one module per command family

pub mod changes;
pub mod run;
pub mod snap;
pub mod user;
