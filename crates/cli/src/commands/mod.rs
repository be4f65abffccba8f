//! Subcommand implementations

pub mod cluster;
pub mod decisions;
pub mod failover;
pub mod health;
