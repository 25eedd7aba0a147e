//! Blitz - Rate-Limiting Reverse Proxy
//!
//! This crate implements a rate-limiting reverse proxy that sits in front
//! of an upstream HTTP service. It absorbs client bursts through
//! priority-ordered token-bucket queues, holds transparent requests until
//! their slot is due, and can mint signed reservation tokens so clients
//! schedule work without keeping a connection open for the full wait.

pub mod config;
pub mod error;
pub mod http;
pub mod limit;
pub mod token;
