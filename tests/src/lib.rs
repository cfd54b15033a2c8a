//! Shared support for the end-to-end test suites.
//!
//! Everything runs in process: the real router, buffer, funnel matcher and
//! partition manager over the in-memory storage backend.

pub mod fixtures;
pub mod mocks;
pub mod setup;
