pub mod client;
pub mod config;
pub mod errors;
pub mod models;
pub mod parser;
pub mod paths;
pub mod runner;
pub mod scheduler;
