//! Data model shared by every pipeline stage.

pub mod content;
pub mod definition;
pub mod dimension;
pub mod variables;
