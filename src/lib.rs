//! Mortar Engine: variable resolution and template substitution for
//! data-driven profile pages.
//!
//! A profile's generators fetch upstream data and derive variables from it,
//! materializers refine those variables in order, and the resulting map is
//! substituted into a locale-projected content tree through user-authored
//! formatters. Broken user logic degrades one value, never the page.

pub mod core;
pub mod schema;
