pub mod clock;
pub mod config;
pub mod crypto;
pub mod detector;
pub mod error;
pub mod finesse;
pub mod monitor;
pub mod notify;
pub mod rate_limit;
pub mod schedule;
pub mod settings;
pub mod store;
pub mod terminal;
