//! meteo-relay: geospatial weather relay for a moving position
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod geohash;
pub mod convert;
pub mod storage;
pub mod data;
pub mod host;
pub mod engine;
pub mod api;
