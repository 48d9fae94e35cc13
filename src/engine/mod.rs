//! Core engine: the spatial cache, cache-first acquisition and the
//! polling scheduler that drives them.

pub mod cache;
pub mod runner;
pub mod scheduler;
pub mod service;
pub mod timers;
