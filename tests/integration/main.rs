//! Integration tests for Linksweep
//!
//! These tests use wiremock to stand up mock HTTP servers and exercise the
//! reqwest transport, the retrying client and the batch runner end to end.

mod runner_tests;
mod transport_tests;
