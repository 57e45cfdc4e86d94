//! soundboard-sdk: platform client for the soundboard bots.
//!
//! - [`platform::Platform`]: every outbound call a bot identity makes
//! - [`http::RestClient`]: the REST implementation of it
//! - [`gateway::connect`]: a gateway session as a stream of [`event::Event`]s
//! - [`fake`]: an in-memory platform for tests (feature `fake`)

pub mod event;
pub mod gateway;
pub mod http;
pub mod model;
pub mod platform;

#[cfg(any(test, feature = "fake"))]
pub mod fake;
