//! Library crate for banner-grab-rs exposing the scan pipeline and its parts.
pub mod config;
pub mod logging;
pub mod output;
pub mod probe;
pub mod scanner;
pub mod stats;
pub mod targets;
pub mod types;
