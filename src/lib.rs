pub mod backoff;
pub mod config;
pub mod engine;
pub mod generate;
pub mod registry;
pub mod routes;
pub mod sandbox;
pub mod validate;
pub mod web_server;
