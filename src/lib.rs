//! pixcache: a caching front for derived images.
//!
//! Requests name a source image and a set of transform commands. The pipeline
//! normalizes the commands, resolves the source through an ordered set of
//! providers, and serves the derived artifact from a durable cache, running at
//! most one transformation per cache key at a time.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
