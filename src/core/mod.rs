//! Core modules: the position allocator and the store it is persisted through.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod position;
pub mod schemas;
pub mod scope;
pub mod store;
pub mod time;
