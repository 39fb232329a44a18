//! CLI command handlers.

pub mod params;
pub mod predict;
pub mod windows;
