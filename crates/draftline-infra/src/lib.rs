//! Infrastructure layer for Draftline.
//!
//! Implements the checkpoint store port from `draftline-core` on SQLite and
//! loads configuration and evaluation criteria from the data directory.

pub mod config;
pub mod criteria;
pub mod filesystem;
pub mod sqlite;
