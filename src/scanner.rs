//! Data directory scanner.
//!
//! Discovers standardized export files under the configured data
//! directory and infers each file's channel from its filename prefix.
//! Files no prefix matches are reported, not guessed at.

use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Filename prefixes mapping exports to channels. The prefix is the
/// part of the filename before the first `_` or `.`.
const CHANNEL_PREFIXES: &[(&str, &str)] = &[
    ("google-ads", "sem"),
    ("sem", "sem"),
    ("display", "display"),
    ("dv360", "display"),
    ("affiliate", "affiliate"),
    ("gsc", "seo"),
    ("seo", "seo"),
];

/// Extensions the preprocessing stage knows how to read.
const DATA_EXTENSIONS: &[&str] = &["csv", "json"];

/// One discovered export file.
#[derive(Debug, Clone)]
pub struct DataFile {
    /// Path relative to the data directory.
    pub path: String,
    /// Channel inferred from the filename prefix; `None` when no
    /// prefix matched, which the quality gate treats as a schema
    /// failure for that file.
    pub channel: Option<String>,
    pub size: u64,
}

/// Scanner over a flat-ish data directory of standardized exports.
pub struct DataScanner {
    data_dir: PathBuf,
    max_file_size: u64,
}

impl DataScanner {
    pub fn new(data_dir: PathBuf, max_file_size: u64) -> Self {
        Self {
            data_dir,
            max_file_size,
        }
    }

    /// Scan for export files, sorted by relative path for determinism.
    pub fn scan(&self) -> Result<Vec<DataFile>> {
        if !self.data_dir.is_dir() {
            return Err(anyhow::anyhow!(
                "data directory not found: {}",
                self.data_dir.display()
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&self.data_dir)
            .follow_links(false)
            .into_iter()
            // Depth 0 is the data dir itself, which may be dot-named.
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    debug!("skipping unreadable entry: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() || !has_data_extension(entry.path()) {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            if size > self.max_file_size {
                warn!(
                    "skipping {} ({size} bytes exceeds limit)",
                    entry.path().display()
                );
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.data_dir)
                .unwrap_or(entry.path());
            let channel = entry
                .path()
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(infer_channel);
            if channel.is_none() {
                warn!("no channel prefix recognized for {}", rel.display());
            }
            files.push(DataFile {
                path: rel.to_string_lossy().to_string(),
                channel: channel.map(String::from),
                size,
            });
        }

        files.sort_by(|a, b| a.path.cmp(&b.path));
        debug!("scanned {} export files", files.len());
        Ok(files)
    }

    /// Distinct channels that have at least one export file, sorted.
    pub fn available_channels(files: &[DataFile]) -> Vec<String> {
        let mut channels: Vec<String> = files.iter().filter_map(|f| f.channel.clone()).collect();
        channels.sort();
        channels.dedup();
        channels
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.len() > 1)
}

fn has_data_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| DATA_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
}

/// Channel for a filename, by longest matching prefix.
fn infer_channel(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_lowercase();
    let stem = lower
        .split(['_', '.'])
        .next()
        .unwrap_or(&lower);
    CHANNEL_PREFIXES
        .iter()
        .find(|(prefix, _)| stem == *prefix)
        .map(|(_, channel)| *channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str, bytes: usize) {
        fs::write(dir.join(name), vec![b'x'; bytes]).unwrap();
    }

    #[test]
    fn test_prefix_channel_inference() {
        assert_eq!(infer_channel("google-ads_2026-02-10.csv"), Some("sem"));
        assert_eq!(infer_channel("GSC_weekly.csv"), Some("seo"));
        assert_eq!(infer_channel("affiliate.json"), Some("affiliate"));
        assert_eq!(infer_channel("display_na.csv"), Some("display"));
        assert_eq!(infer_channel("podcast_feed.csv"), None);
    }

    #[test]
    fn test_scan_filters_and_sorts() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "google-ads_w07.csv", 10);
        touch(tmp.path(), "affiliate_w07.csv", 10);
        touch(tmp.path(), "notes.txt", 10);
        touch(tmp.path(), ".hidden.csv", 10);

        let scanner = DataScanner::new(tmp.path().to_path_buf(), 1024);
        let files = scanner.scan().unwrap();
        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["affiliate_w07.csv", "google-ads_w07.csv"]);
    }

    #[test]
    fn test_scan_dot_named_data_dir() {
        let tmp = TempDir::new().unwrap();
        let data_dir = tmp.path().join(".exports");
        fs::create_dir(&data_dir).unwrap();
        touch(&data_dir, "sem_w07.csv", 10);
        touch(&data_dir, ".hidden.csv", 10);

        let scanner = DataScanner::new(data_dir, 1024);
        let files = scanner.scan().unwrap();
        // Only entries below the root are subject to the hidden filter.
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "sem_w07.csv");
        assert_eq!(files[0].channel.as_deref(), Some("sem"));
    }

    #[test]
    fn test_scan_size_limit() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "sem_big.csv", 2048);
        touch(tmp.path(), "sem_ok.csv", 16);

        let scanner = DataScanner::new(tmp.path().to_path_buf(), 1024);
        let files = scanner.scan().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "sem_ok.csv");
    }

    #[test]
    fn test_unknown_prefix_has_no_channel() {
        let tmp = TempDir::new().unwrap();
        touch(tmp.path(), "mystery_w07.csv", 8);

        let scanner = DataScanner::new(tmp.path().to_path_buf(), 1024);
        let files = scanner.scan().unwrap();
        assert_eq!(files[0].channel, None);
    }

    #[test]
    fn test_available_channels_dedups() {
        let files = vec![
            DataFile {
                path: "sem_a.csv".into(),
                channel: Some("sem".into()),
                size: 1,
            },
            DataFile {
                path: "sem_b.csv".into(),
                channel: Some("sem".into()),
                size: 1,
            },
            DataFile {
                path: "gsc.csv".into(),
                channel: Some("seo".into()),
                size: 1,
            },
        ];
        assert_eq!(DataScanner::available_channels(&files), vec!["sem", "seo"]);
    }

    #[test]
    fn test_missing_dir_errors() {
        let scanner = DataScanner::new(PathBuf::from("/nonexistent/pulseline"), 1024);
        assert!(scanner.scan().is_err());
    }
}
