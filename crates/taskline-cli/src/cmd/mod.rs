pub mod actions;
pub mod config;
pub mod operations;
pub mod prune;
pub mod receivers;
