//! MCP server
//!
//! JSON-RPC over stdio exposing the document registry as resources plus the
//! read/browse tools. The session can also call back into the client for
//! sampling, which the OCR layer uses.

mod handlers;
mod peer;
pub mod protocol;
mod server;

pub use handlers::{not_found_message, Handlers, BROWSE_TOOL, DOC_TEMPLATE, FOLDERS_URI, READ_TOOL, RECENT_URI};
pub use peer::{ClientPeer, PeerError};
pub use server::McpServer;
