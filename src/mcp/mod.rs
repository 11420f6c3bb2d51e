//! MCP connectors: SSRF validation of server URLs and capability discovery.

pub mod discovery;
pub mod url_guard;

pub use discovery::{Discovery, McpClient};
pub use url_guard::validate_mcp_url;
