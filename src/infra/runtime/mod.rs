pub mod channel;
pub mod limits;
pub mod mcp_transport;
pub mod session;
