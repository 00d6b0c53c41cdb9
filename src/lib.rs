//! Framework Documentation MCP Service
//!
//! This crate serves documentation and code examples for popular frameworks
//! over the Model Context Protocol. Fetched content is kept in a tiered cache
//! and refreshed when it goes stale, with at most one upstream fetch in flight
//! per document.
//!
//! # Features
//!
//! - Framework catalog with category filtering and ranked search
//! - Local LRU tier plus an optional shared remote tier (Redis or a directory)
//! - Single-flight refresh with serve-stale-on-error
//! - Keyword search over cached documentation
//! - Task context and code compatibility checks across frameworks
//! - SSE and stdio MCP servers
//!
//! # Modules
//!
//! - [`registry`]: Framework catalog
//! - [`cache`]: Tiered cache store
//! - [`coordinator`]: Freshness and refresh coordination
//! - [`search`]: Search over cached documents
//! - [`context`]: Cross-framework task context and compatibility analysis
//! - [`providers`]: GitHub and website content providers
//! - [`service`]: The operations exposed to clients
//! - [`mcp`]: MCP tool handler
//! - [`server`]: Server bootstrap and transports

pub mod cache;
pub mod config;
pub mod context;
pub mod coordinator;
mod lock;
pub mod mcp;
pub mod providers;
pub mod registry;
pub mod search;
pub mod server;
pub mod service;
