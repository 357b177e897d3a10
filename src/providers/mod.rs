//! Clients for the shuttle backend: REST API and WebSocket push feed.

pub mod push;
pub mod rest;
