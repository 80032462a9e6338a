//! The pulsemon collector agent: samples runtime metrics and pushes them to
//! the server.

pub mod agent;
pub mod config;
pub mod reporter;
