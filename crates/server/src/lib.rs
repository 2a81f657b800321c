pub mod auth;
pub mod cli;
pub mod config_store;
pub mod error;
pub mod logs;
pub mod retention;
pub mod routes;
pub mod scheduler;
pub mod state;
pub mod worker;
