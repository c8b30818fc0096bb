pub mod classify;
pub mod config;
pub mod observability;
pub mod rpc;
pub mod types;
