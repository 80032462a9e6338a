//! Types and helpers shared by the pulsemon agent and server.
//!
//! [`types`] holds the metric wire model; [`codec`] and [`signing`] implement
//! the transport conventions (gzip bodies, `HashSHA256` integrity header) and
//! [`retry`] the bounded retry schedule used for delivery and database calls.

pub mod codec;
pub mod retry;
pub mod signing;
pub mod types;
