pub mod cleanup;
pub mod cluster;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod mount;
pub mod platform;
pub mod process;
pub mod release;
pub mod retry;
pub mod scenario;
pub mod upgrade;
pub mod workload;

pub use error::Error;
