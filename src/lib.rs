// ABOUTME: Library root for dbsync-replicator
// ABOUTME: Change detection by content hash, outbound publishing and the inbound message consumer

pub mod commands;
pub mod config;
pub mod consumer;
pub mod error;
pub mod hash;
pub mod publisher;
pub mod replica;

pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use publisher::SyncPublisher;
