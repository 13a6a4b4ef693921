//! Resolution pipeline stages.

pub mod bubble;
pub mod config;
pub mod fetch;
pub mod formatter;
pub mod generator;
pub mod helpers;
pub mod logic;
pub mod materializer;
pub mod pipeline;
pub mod substitute;
pub mod throttle;
pub mod transpile;
