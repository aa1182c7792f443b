use crate::core::filter::{Candidate, is_image_url};
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid candidate listing {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No local copy for {url}")]
    NotMirrored { url: String },
}

/// Supplies the ranked batch of raw posts.
pub trait CandidateSource {
    fn fetch_candidates(&self) -> Result<Vec<Candidate>, SourceError>;
}

/// Downloads the image behind a post URL.
pub trait ImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError>;
}

/// Reads a ranked listing saved as a JSON array of posts.
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl CandidateSource for JsonFileSource {
    fn fetch_candidates(&self) -> Result<Vec<Candidate>, SourceError> {
        let path = self.path.display().to_string();
        let data = fs::read(&self.path).map_err(|source| SourceError::Io {
            path: path.clone(),
            source,
        })?;
        let candidates: Vec<Candidate> =
            serde_json::from_slice(&data).map_err(|source| SourceError::Parse { path, source })?;
        info!(
            "Loaded {} ranked posts from {}",
            candidates.len(),
            self.path.display()
        );
        Ok(candidates)
    }
}

/// Rewrites imgur page links to the direct image link.
pub fn normalize_image_url(url: &str) -> String {
    ["http://imgur.com/", "https://imgur.com/"]
        .iter()
        .find_map(|prefix| url.strip_prefix(prefix))
        .map(|id| format!("https://i.imgur.com/{id}.jpg"))
        .unwrap_or_else(|| url.to_string())
}

/// Serves images from a local mirror directory, keyed by file name.
///
/// `file://` URLs are read as-is; anything else is looked up by the last
/// path segment of its normalized URL.
#[derive(Debug, Clone)]
pub struct FsImageFetcher {
    mirror_dir: PathBuf,
}

impl FsImageFetcher {
    pub fn new<P: Into<PathBuf>>(mirror_dir: P) -> Self {
        Self {
            mirror_dir: mirror_dir.into(),
        }
    }

    fn resolve(&self, url: &str) -> Option<PathBuf> {
        if let Some(path) = url.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        let url = normalize_image_url(url);
        let name = url.rsplit('/').next().filter(|n| !n.is_empty())?;
        let name = name.split(['?', '#']).next().unwrap_or(name);
        Some(self.mirror_dir.join(name))
    }

    /// Every file under the mirror directory that a candidate URL could
    /// resolve to, sorted by path.
    pub fn mirrored_images(&self) -> Vec<PathBuf> {
        let mut images: Vec<PathBuf> = WalkDir::new(&self.mirror_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter(|entry| {
                entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| is_image_url(&name.to_lowercase()))
            })
            .map(|entry| entry.into_path())
            .collect();
        images.sort();
        debug!(
            "{} mirrored images under {}",
            images.len(),
            self.mirror_dir.display()
        );
        images
    }
}

impl ImageFetcher for FsImageFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let path = self
            .resolve(url)
            .filter(|p| p.is_file())
            .ok_or_else(|| FetchError::NotMirrored {
                url: url.to_string(),
            })?;
        debug!("Reading image for {} from {}", url, path.display());
        Ok(fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_normalize_image_url() {
        assert_eq!(
            normalize_image_url("http://imgur.com/AbC12"),
            "https://i.imgur.com/AbC12.jpg"
        );
        assert_eq!(
            normalize_image_url("https://imgur.com/AbC12"),
            "https://i.imgur.com/AbC12.jpg"
        );
        assert_eq!(
            normalize_image_url("https://i.redd.it/x.png"),
            "https://i.redd.it/x.png"
        );
    }

    #[test]
    fn test_fs_fetcher_reads_mirrored_files() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("AbC12.jpg"), b"jpeg bytes").unwrap();
        std::fs::write(temp_dir.path().join("x.png"), b"png bytes").unwrap();

        let fetcher = FsImageFetcher::new(temp_dir.path());
        assert_eq!(fetcher.fetch("https://imgur.com/AbC12").unwrap(), b"jpeg bytes");
        assert_eq!(fetcher.fetch("https://i.redd.it/x.png?s=1").unwrap(), b"png bytes");

        let direct = format!("file://{}", temp_dir.path().join("x.png").display());
        assert_eq!(fetcher.fetch(&direct).unwrap(), b"png bytes");

        assert!(matches!(
            fetcher.fetch("https://i.redd.it/missing.jpg"),
            Err(FetchError::NotMirrored { .. })
        ));
    }

    #[test]
    fn test_mirrored_images_lists_fetchable_files() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("2024");
        std::fs::create_dir(&nested).unwrap();
        for name in ["b.png", "A.JPG", "clip.gif", "notes.txt"] {
            std::fs::write(temp_dir.path().join(name), b"x").unwrap();
        }
        std::fs::write(nested.join("c.jpg"), b"x").unwrap();

        let images = FsImageFetcher::new(temp_dir.path()).mirrored_images();
        assert_eq!(
            images,
            vec![
                nested.join("c.jpg"),
                temp_dir.path().join("A.JPG"),
                temp_dir.path().join("b.png"),
            ]
        );
    }

    #[test]
    fn test_json_source() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("hot.json");
        std::fs::write(
            &path,
            r#"[{"id":"t3_abc","title":"A cat","url":"https://i.redd.it/cat.jpg",
                "subreddit":"r/cats","score":420,"upvote_ratio":0.97,"created_utc":1714564800}]"#,
        )
        .unwrap();

        let candidates = JsonFileSource::new(&path).fetch_candidates().unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].id.as_str(), "t3_abc");
        assert!(!candidates[0].locked);

        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(
            JsonFileSource::new(&path).fetch_candidates(),
            Err(SourceError::Parse { .. })
        ));
    }
}
