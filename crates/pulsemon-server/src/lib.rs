//! HTTP collector server: accepts metric updates from agents, accumulates
//! them in the selected storage backend and serves them back.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod state;
