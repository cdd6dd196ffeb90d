//! Resumable, chunked lesson-media ingestion service for the LMS backend.
//!
//! Accepts video and material uploads in fixed-size chunks over HTTP, tracks
//! per-upload progress in an in-memory session registry, and assembles
//! completed uploads into their final published location.

pub mod access_control;
pub mod api;
pub mod config;
pub mod duration_probe;
pub mod merge;
pub mod metrics;
pub mod notify;
pub mod registry;
pub mod store;
pub mod types;
pub mod writer_pool;
