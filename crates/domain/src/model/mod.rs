mod activity;
mod agent;
mod logs;
mod mcp_connection;
mod oauth;

pub use activity::*;
pub use agent::*;
pub use logs::*;
pub use mcp_connection::*;
pub use oauth::*;
