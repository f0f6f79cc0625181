//! The media resource tree
//!
//! Nodes are created lazily: a folder stages its candidates on first
//! discovery and turns them into children in batches.

pub mod aggregator;
pub mod archive;
pub mod disc;
pub mod feed;
pub mod file;
pub mod library;
pub mod node;
pub mod playlist;
pub mod sorting;

pub use aggregator::Aggregator;
pub use archive::{ArchiveEntry, ArchiveFormat, ArchiveSource};
pub use disc::{DiscLayout, DiscSource, DiscTitle};
pub use feed::{FeedSource, StreamLeaf, parse_feed, youtube_feed_url};
pub use file::{FileNode, Span, TrackTags, Validity};
pub use library::{LIBRARY_FOLDER_NAME, library_spec};
pub use node::{ChildSpec, Node, NodeKind, NodeRef, ROOT_ID};
pub use playlist::{CueTrack, PlaylistEntry, PlaylistFormat, PlaylistSource};
pub use sorting::{SortMethod, display_name, natural_cmp};
