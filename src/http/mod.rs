//! HTTP surface around the MCP endpoint
//!
//! Health and info routes plus the fallback; the `/mcp` handler itself comes from
//! the transport binding in `crate::mcp::transport`.

pub mod handlers;
