//! Database models for persistent storage
//! These models map directly to SQLite tables

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// One analyzed file (or cue sheet track) stored in the `files` table
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbMediaFile {
    /// Absolute path on disk
    pub filename: String,
    /// 0 for the whole file, 1.. for cue sheet tracks
    pub sub_track: i64,
    /// File modification time (ms since epoch) the metadata belongs to
    pub modified: i64,
    /// Media kind ("audio", "video", ...)
    pub kind: String,
    /// Serialized metadata (JSON)
    pub metadata: String,
    /// Last write timestamp
    pub updated_at: i64,
}

/// Key columns only, used by cleanup
#[derive(Debug, Clone, FromRow)]
pub struct DbFileStamp {
    pub filename: String,
    pub sub_track: i64,
    pub modified: i64,
}

// ============ Input structs for creating new records ============

/// Input for inserting or replacing a file row
#[derive(Debug, Clone)]
pub struct NewMediaFile {
    pub filename: String,
    pub sub_track: i64,
    pub modified: i64,
    pub kind: String,
    pub metadata: String,
}
