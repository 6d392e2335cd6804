pub mod agent;
pub mod mcp;
pub mod parser;
pub mod tooling;
