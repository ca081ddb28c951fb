//! Cloud backends for the host runner.
//!
//! - [`RestCloud`]: the realtime database over HTTPS
//! - [`DemoCloud`]: a local generator for running without an account

mod demo;
mod rest;

pub use demo::DemoCloud;
pub use rest::RestCloud;
