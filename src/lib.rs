//! CRM source connector.
//!
//! Reads CRM objects whose property schemas are too large for one request:
//! properties are split into request-sized partitions, each partition is
//! paginated with a cursor, and the partial records are merged back by id.

pub mod cmd;
pub mod config;
pub mod errors;
pub mod http;
pub mod log;
pub mod pipeline;
pub mod utils;
pub mod writer;
