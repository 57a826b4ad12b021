pub mod assistant;
pub mod config;
pub mod format;
pub mod web_server;
