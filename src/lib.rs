//! pvemcp - an MCP gateway for a Proxmox VE node.
//!
//! Exposes a small fixed set of read-only tools over the MCP HTTP+SSE
//! transport. One client session is served at a time; opening a new event
//! stream supersedes the previous session.

pub mod api;
pub mod config;
pub mod mcp;
pub mod server;
pub mod session;
pub mod tls;
pub mod upstream;
