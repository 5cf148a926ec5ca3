//! Command dispatch and batch orchestration between a tool-calling agent and
//! a remote design host.
//!
//! Agents see a small catalogue of named commands ([`registry`]). Each call is
//! validated locally, then either answered by the bridge, forwarded to the
//! host over the [`transport`] as a correlated request ([`client`]), or
//! expanded into many such requests ([`dispatcher`], [`chunked`]).

#[cfg(feature = "http-api")]
pub mod api;
pub mod chunked;
pub mod client;
pub mod correlation;
pub mod demo;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod host;
pub mod logging;
pub mod paths;
pub mod progress;
pub mod protocol;
pub mod registry;
pub mod settings;
pub mod state;
pub mod subscriptions;
pub mod transport;
