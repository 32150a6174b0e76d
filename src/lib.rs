pub mod config;
pub mod filter;
pub mod message;
pub mod pg;
pub mod stream;
