pub mod config;
pub mod error;
pub mod platform;
pub mod report;
pub mod schedule;
pub mod types;
