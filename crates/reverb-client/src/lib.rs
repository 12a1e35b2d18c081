//! Reverb Client - HTTP client for the upstream review feed.
//!
//! This crate provides the [`feed`] module: an HTTP client for the
//! store's paginated customer-review RSS feed, including request building,
//! response classification, and entry normalization.
//!
//! # Overview
//!
//! The client fetches exactly one page per call and classifies failures at
//! the point of failure; pagination, retries, and rate limiting live in
//! `reverb-core`.

pub mod feed;

// Re-export main client types
pub use feed::{AppStoreFeedClient, DEFAULT_BASE_URL};
