//! sitegrab - configuration-driven media crawler.
//!
//! Site adapters describe how to find items, metadata fields and pagination
//! on a site. The crawl engine routes URLs to modes, extracts fields,
//! resolves stream manifests hidden behind players, downloads through one
//! of several backends and writes a metadata sidecar next to each file.

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod download;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod metadata;
pub mod pagination;
pub mod router;
pub mod storage;
pub mod stream;
