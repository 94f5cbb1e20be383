pub mod cli;
pub mod commands;
pub mod config;
pub mod docker;
pub mod events;
pub mod logs;
pub mod orchestrator;
pub mod platform;
pub mod probe;
pub mod process;
