//! Subsystems that own ordered tables.

pub mod library;
pub mod promoted;
