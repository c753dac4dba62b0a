//! Core library: synchronization and reconciliation engine between a remote
//! playlist catalog, a relational store, and a local music filesystem.
pub mod api;
pub mod binding;
pub mod config;
pub mod db;
pub mod duplicate;
pub mod error;
pub mod exporter;
pub mod matcher;
pub mod models;
pub mod orchestrator;
pub mod sync;
