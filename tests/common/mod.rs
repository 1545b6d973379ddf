//! Common test utilities for build-bot integration tests

#[allow(dead_code)]
pub mod fixtures;
#[allow(dead_code)]
pub mod recording;

#[allow(unused_imports)]
pub use fixtures::*;
#[allow(unused_imports)]
pub use recording::*;
