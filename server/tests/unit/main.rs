//! Unit tests for previewd
//!
//! These tests use in-memory collaborators and run fast without external I/O.

mod mocks;
