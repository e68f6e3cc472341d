//! Model Context Protocol (MCP) server handle and its HTTP transport
//!
//! Provides JSON-RPC envelope helpers, the tool/resource registry with method
//! dispatch, and the binding that exposes it over a single HTTP endpoint.

pub mod rpc;
pub mod server;
pub mod transport;
