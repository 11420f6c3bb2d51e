pub mod api;
pub mod assembler;
pub mod auth;
pub mod backend;
pub mod config;
pub mod errors;
pub mod mcp;
pub mod realtime;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod ws;
