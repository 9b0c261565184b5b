//! `previewd`: supervises preview instances of user applications.
//!
//! Layering: `domain` is pure, `application` holds the port traits and the
//! instance manager, `infra` implements the ports against the OS, `api` and
//! `app` wire everything into the HTTP server.

pub mod api;
pub mod app;
pub mod application;
pub mod domain;
pub mod infra;
