//! Nearby-places cache in front of a paid provider.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod util;
