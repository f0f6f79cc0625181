//! Lazily discovered, cache-backed media resource tree
//!
//! Handles:
//! - Folder aggregation with sorting, thumbnails and alphabetical splits
//! - Per-file analysis memoized in a metadata cache
//! - Playlists, archives, disc images and web feeds as folders
//! - Cancellable library scans and filesystem change monitoring

pub mod cache;
pub mod config;
pub mod context;
pub mod database;
pub mod media;
pub mod root;
pub mod tree;
pub mod utils;

#[cfg(test)]
mod testing;
