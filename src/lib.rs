pub mod aws;
pub mod cli;
pub mod commands;
pub mod config;
pub mod constants;
pub mod environ;
pub mod error;
pub mod exec;
pub mod profile;
pub mod prompt;
pub mod secret_store;
pub mod server;
