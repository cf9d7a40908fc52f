pub mod config;
pub mod error;
pub mod messages;
pub mod persistence;
pub mod rate_limit;
pub mod registry;
pub mod room;
pub mod routes;
pub mod server;
