pub mod commands;
pub mod components;
pub mod config;
pub mod diff;
pub mod filter;
pub mod k8s;
pub mod model;
pub mod objsort;
pub mod spec;
pub mod telemetry;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
