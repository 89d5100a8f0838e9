//! Relay Daemon - Text-line broadcast relay
//!
//! This crate provides the server side of the relay:
//! - `config` - Bind address and write timeout
//! - `registry` - Shared registry of joined connections
//! - `server` - TCP accept loop, per-client sessions and broadcast fanout
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       relayd                                │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │  RelayServer    │────▶│         Registry            │   │
//! │  │ (TcpListener)   │     │   (connection id -> peer)   │   │
//! │  └────────┬────────┘     └──────────────▲──────────────┘   │
//! │           │                             │                   │
//! │           │ spawn per client            │ snapshot / evict  │
//! │           ▼                             │                   │
//! │  ┌─────────────────┐     ┌──────────────┴──────────────┐   │
//! │  │ SessionHandler  │────▶│          broadcast          │   │
//! │  │  (per client)   │     │     (line to every peer)    │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Peer failures are contained at the connection boundary

pub mod config;
pub mod registry;
pub mod server;
