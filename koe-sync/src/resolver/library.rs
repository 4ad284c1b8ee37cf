//! Local library scanner
//!
//! Enumerates work folders under the library root and builds ordered track
//! trees. Directory reads go through the bounded [`TaskQueue`] so a scan
//! never has more than the configured number of filesystem operations
//! outstanding; recursion itself is not gated (a permit is held only for the
//! duration of one directory read, never across child awaits).

use super::{extract_work_id, ResolveError};
use crate::config::SyncConfig;
use crate::queue::TaskQueue;
use futures::future::{self, BoxFuture, FutureExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

/// Classification of a library file by extension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Text,
    Image,
    Other,
}

impl TrackKind {
    pub fn classify(extension: &str) -> Self {
        match extension.to_ascii_lowercase().as_str() {
            "mp3" | "wav" | "flac" | "aac" | "m4a" | "ogg" | "opus" | "mp4" | "mkv" | "avi"
            | "mov" => TrackKind::Audio,
            "srt" | "vtt" | "lrc" => TrackKind::Text,
            "jpg" | "jpeg" | "png" | "gif" | "webp" => TrackKind::Image,
            _ => TrackKind::Other,
        }
    }
}

/// One node of a work's track tree. Siblings are ordered with a
/// numeric-aware natural comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TrackNode {
    Folder {
        name: String,
        children: Vec<TrackNode>,
    },
    File {
        name: String,
        kind: TrackKind,
        /// Absolute streaming URL
        url: String,
        /// Absolute download URL
        download_url: String,
    },
}

/// Encode everything except unreserved characters; folder and file names
/// carry spaces and non-ASCII freely.
const SEGMENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// One URL path segment, percent-encoded
fn encode_segment(name: &str) -> String {
    utf8_percent_encode(name, SEGMENT_ENCODE_SET).to_string()
}

/// Library filesystem walker
pub struct LibraryScanner {
    config: Arc<SyncConfig>,
    queue: TaskQueue,
}

impl LibraryScanner {
    pub fn new(config: Arc<SyncConfig>) -> Self {
        let queue = TaskQueue::new(config.scan_concurrency);
        Self { config, queue }
    }

    /// Work IDs physically present as top-level folders under the library
    /// root, in natural folder-name order. Folders without an embedded RJ
    /// code are ignored.
    pub async fn work_ids(&self) -> std::io::Result<Vec<String>> {
        let mut named: Vec<(String, String)> = Vec::new();
        let mut entries = fs::read_dir(&self.config.library_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(id) = extract_work_id(&name) {
                named.push((name, id));
            }
        }

        named.sort_by(|a, b| natural_cmp(&a.0, &b.0));

        let mut ids = Vec::with_capacity(named.len());
        for (_, id) in named {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }

    /// Locate the library folder for a work, if present
    pub async fn work_dir(&self, id: &str) -> std::io::Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(&self.config.library_root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if extract_work_id(&name).as_deref() == Some(id) {
                return Ok(Some(entry.path()));
            }
        }
        Ok(None)
    }

    /// Build the ordered track tree for a work, or `None` if the work has no
    /// library folder.
    pub async fn track_tree(&self, id: &str) -> Result<Option<Vec<TrackNode>>, ResolveError> {
        let Some(dir) = self.work_dir(id).await? else {
            return Ok(None);
        };
        let nodes = self.walk(dir, id.to_string()).await?;
        Ok(Some(nodes))
    }

    /// Recursively list one directory level; subdirectories are walked
    /// concurrently, children preserved in natural sibling order.
    fn walk(&self, dir: PathBuf, rel: String) -> BoxFuture<'_, Result<Vec<TrackNode>, ResolveError>> {
        async move {
            let mut listed = self.queue.enqueue(list_dir(dir.clone())).await?;
            listed.sort_by(|a, b| natural_cmp(&a.0, &b.0));

            let tasks: Vec<BoxFuture<'_, Result<TrackNode, ResolveError>>> = listed
                .into_iter()
                .map(|(name, is_dir)| {
                    if is_dir {
                        let child =
                            self.walk(dir.join(&name), format!("{}/{}", rel, encode_segment(&name)));
                        async move {
                            Ok(TrackNode::Folder {
                                name,
                                children: child.await?,
                            })
                        }
                        .boxed()
                    } else {
                        let node = self.file_node(&name, &rel);
                        future::ready(Ok(node)).boxed()
                    }
                })
                .collect();

            future::join_all(tasks)
                .await
                .into_iter()
                .collect::<Result<Vec<_>, _>>()
        }
        .boxed()
    }

    fn file_node(&self, name: &str, rel: &str) -> TrackNode {
        let kind = Path::new(name)
            .extension()
            .map(|ext| TrackKind::classify(&ext.to_string_lossy()))
            .unwrap_or(TrackKind::Other);
        let host = &self.config.public_host;
        let encoded = encode_segment(name);
        TrackNode::File {
            name: name.to_string(),
            kind,
            url: format!("{}/api/media/stream/{}/{}", host, rel, encoded),
            download_url: format!("{}/api/media/download/{}/{}", host, rel, encoded),
        }
    }
}

/// One level of directory entries: `(name, is_directory)`
async fn list_dir(dir: PathBuf) -> std::io::Result<Vec<(String, bool)>> {
    let mut listed = Vec::new();
    let mut entries = fs::read_dir(&dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let is_dir = entry.file_type().await?.is_dir();
        listed.push((entry.file_name().to_string_lossy().into_owned(), is_dir));
    }
    Ok(listed)
}

/// Case-insensitive comparison with numeric-aware ordering of digit runs,
/// so `2.mp3` sorts before `10.mp3`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let (mut i, mut j) = (0, 0);

    while i < a_chars.len() && j < b_chars.len() {
        let (x, y) = (a_chars[i], b_chars[j]);
        if x.is_ascii_digit() && y.is_ascii_digit() {
            let a_run: String = a_chars[i..].iter().take_while(|c| c.is_ascii_digit()).collect();
            let b_run: String = b_chars[j..].iter().take_while(|c| c.is_ascii_digit()).collect();
            match cmp_digit_runs(&a_run, &b_run) {
                Ordering::Equal => {
                    i += a_run.len();
                    j += b_run.len();
                }
                other => return other,
            }
        } else {
            match x.to_lowercase().cmp(y.to_lowercase()) {
                Ordering::Equal => {
                    i += 1;
                    j += 1;
                }
                other => return other,
            }
        }
    }

    (a_chars.len() - i).cmp(&(b_chars.len() - j))
}

/// Compare two digit runs numerically without overflowing: strip leading
/// zeros, then shorter-is-smaller, then lexical. Numerically equal runs with
/// more leading zeros order later.
fn cmp_digit_runs(a: &str, b: &str) -> Ordering {
    let a_stripped = a.trim_start_matches('0');
    let b_stripped = b.trim_start_matches('0');
    a_stripped
        .len()
        .cmp(&b_stripped.len())
        .then_with(|| a_stripped.cmp(b_stripped))
        .then_with(|| a.len().cmp(&b.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_config;

    #[test]
    fn test_classify_extensions() {
        assert_eq!(TrackKind::classify("mp3"), TrackKind::Audio);
        assert_eq!(TrackKind::classify("FLAC"), TrackKind::Audio);
        assert_eq!(TrackKind::classify("mkv"), TrackKind::Audio);
        assert_eq!(TrackKind::classify("lrc"), TrackKind::Text);
        assert_eq!(TrackKind::classify("webp"), TrackKind::Image);
        assert_eq!(TrackKind::classify("pdf"), TrackKind::Other);
        assert_eq!(TrackKind::classify(""), TrackKind::Other);
    }

    #[test]
    fn test_natural_ordering() {
        let mut names = vec!["track10.mp3", "track2.mp3", "Track1.mp3"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["Track1.mp3", "track2.mp3", "track10.mp3"]);

        assert_eq!(natural_cmp("2", "10"), Ordering::Less);
        assert_eq!(natural_cmp("02", "2"), Ordering::Greater);
        assert_eq!(natural_cmp("a", "B"), Ordering::Less);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
    }

    fn touch(path: &Path) {
        std::fs::write(path, b"x").unwrap();
    }

    #[tokio::test]
    async fn test_track_tree_orders_and_classifies() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("RJ123456 test work");
        std::fs::create_dir_all(work.join("SE付き")).unwrap();
        touch(&work.join("10.mp3"));
        touch(&work.join("2.mp3"));
        touch(&work.join("cover.jpg"));
        touch(&work.join("SE付き").join("01.wav"));
        touch(&work.join("SE付き").join("script.lrc"));

        let config = Arc::new(test_config(root.path().to_path_buf()));
        let scanner = LibraryScanner::new(config);

        let tree = scanner.track_tree("RJ123456").await.unwrap().unwrap();
        let names: Vec<&str> = tree
            .iter()
            .map(|node| match node {
                TrackNode::Folder { name, .. } | TrackNode::File { name, .. } => name.as_str(),
            })
            .collect();
        assert_eq!(names, vec!["2.mp3", "10.mp3", "cover.jpg", "SE付き"]);

        match &tree[3] {
            TrackNode::Folder { children, .. } => {
                assert_eq!(children.len(), 2);
                match &children[1] {
                    TrackNode::File { name, kind, url, .. } => {
                        assert_eq!(name, "script.lrc");
                        assert_eq!(*kind, TrackKind::Text);
                        assert!(
                            url.contains("/api/media/stream/RJ123456/SE%E4%BB%98%E3%81%8D/script.lrc")
                        );
                    }
                    other => panic!("expected file, got {:?}", other),
                }
            }
            other => panic!("expected folder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_urls_percent_encode_path_segments() {
        let root = tempfile::tempdir().unwrap();
        let work = root.path().join("RJ123456 test");
        std::fs::create_dir_all(work.join("disc 1")).unwrap();
        touch(&work.join("disc 1").join("track 01 (SE).mp3"));

        let config = Arc::new(test_config(root.path().to_path_buf()));
        let scanner = LibraryScanner::new(config);

        let tree = scanner.track_tree("RJ123456").await.unwrap().unwrap();
        match &tree[0] {
            TrackNode::Folder { children, .. } => match &children[0] {
                TrackNode::File {
                    name,
                    url,
                    download_url,
                    ..
                } => {
                    // Raw name is preserved; only the URLs are encoded
                    assert_eq!(name, "track 01 (SE).mp3");
                    assert!(url.ends_with(
                        "/api/media/stream/RJ123456/disc%201/track%2001%20%28SE%29.mp3"
                    ));
                    assert!(download_url.ends_with(
                        "/api/media/download/RJ123456/disc%201/track%2001%20%28SE%29.mp3"
                    ));
                }
                other => panic!("expected file, got {:?}", other),
            },
            other => panic!("expected folder, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_track_tree_missing_work_is_none() {
        let root = tempfile::tempdir().unwrap();
        let config = Arc::new(test_config(root.path().to_path_buf()));
        let scanner = LibraryScanner::new(config);
        assert!(scanner.track_tree("RJ999999").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_work_ids_skips_non_work_entries() {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir(root.path().join("RJ000010 b")).unwrap();
        std::fs::create_dir(root.path().join("RJ000002 a")).unwrap();
        std::fs::create_dir(root.path().join("no id here")).unwrap();
        touch(&root.path().join("RJ000111.txt"));

        let config = Arc::new(test_config(root.path().to_path_buf()));
        let scanner = LibraryScanner::new(config);

        let ids = scanner.work_ids().await.unwrap();
        assert_eq!(ids, vec!["RJ000002", "RJ000010"]);
    }
}
