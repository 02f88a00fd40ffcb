//! Shared configuration and filesystem helpers for gbridge crates.

pub mod config;
pub mod platform;
