//! Integration test target: scheduler, cache and host wired together
//! against in-memory fakes.

mod mock_host;
mod scheduler;
