use crate::core::filter::Candidate;
use crate::services::selection::SelectedPost;
use chrono::Utc;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Sink the chosen post is handed to.
pub trait Publisher {
    fn publish(&self, post: &SelectedPost) -> Result<PublishReceipt, PublishError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub post_id: String,
    pub location: String,
}

/// Status text for a mirrored post: title, short link, subreddit, then tags.
pub fn caption(candidate: &Candidate, tags: &[String]) -> String {
    let mut text = format!(
        "{} https://redd.it/{} ({})",
        candidate.title,
        candidate.id.body(),
        candidate.subreddit
    );
    if !tags.is_empty() {
        text.push_str("\n\n");
        text.push_str(&tags.join(" "));
    }
    text
}

#[derive(Debug, Serialize)]
struct Sidecar<'a> {
    id: &'a str,
    caption: String,
    possibly_sensitive: bool,
    source_url: &'a str,
    image: String,
    published_at: String,
}

/// Writes `<id>.jpg` plus a `<id>.json` sidecar into an outbox directory.
#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    output_dir: PathBuf,
    tags: Vec<String>,
}

impl DirectoryPublisher {
    pub fn new<P: Into<PathBuf>>(output_dir: P, tags: Vec<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            tags,
        }
    }
}

impl Publisher for DirectoryPublisher {
    fn publish(&self, post: &SelectedPost) -> Result<PublishReceipt, PublishError> {
        fs::create_dir_all(&self.output_dir)?;

        let id = post.candidate.id.body();
        let image_name = format!("{id}.jpg");
        let image_path = self.output_dir.join(&image_name);
        fs::write(&image_path, &post.jpeg)?;

        let sidecar = Sidecar {
            id: post.candidate.id.as_str(),
            caption: caption(&post.candidate, &self.tags),
            possibly_sensitive: post.candidate.nsfw || post.candidate.spoiler,
            source_url: &post.source_url,
            image: image_name,
            published_at: Utc::now().to_rfc3339(),
        };
        let sidecar_path = self.output_dir.join(format!("{id}.json"));
        fs::write(&sidecar_path, serde_json::to_string_pretty(&sidecar)?)?;

        info!("Published {} to {}", post.candidate.id, image_path.display());
        Ok(PublishReceipt {
            post_id: post.candidate.id.to_string(),
            location: image_path.display().to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::hash::{FuzzyHash, StrictHash};
    use crate::core::record::PostId;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn candidate() -> Candidate {
        Candidate {
            id: PostId::parse("t3_k2x9q1").unwrap(),
            title: "Sunrise over the bay".to_string(),
            url: "https://i.redd.it/sun.jpg".to_string(),
            subreddit: "r/EarthPorn".to_string(),
            score: 1200,
            upvote_ratio: 0.98,
            created_utc: Utc.with_ymd_and_hms(2024, 5, 1, 6, 0, 0).unwrap(),
            is_self: false,
            stickied: false,
            locked: false,
            nsfw: false,
            spoiler: true,
        }
    }

    #[test]
    fn test_caption() {
        assert_eq!(
            caption(&candidate(), &[]),
            "Sunrise over the bay https://redd.it/k2x9q1 (r/EarthPorn)"
        );
        let tagged = caption(&candidate(), &["#reddit".to_string(), "#mirror".to_string()]);
        assert!(tagged.ends_with("\n\n#reddit #mirror"));
    }

    #[test]
    fn test_directory_publisher_writes_image_and_sidecar() {
        let temp_dir = TempDir::new().unwrap();
        let publisher = DirectoryPublisher::new(temp_dir.path().join("outbox"), vec![]);
        let post = SelectedPost {
            candidate: candidate(),
            source_url: "https://i.redd.it/sun.jpg".to_string(),
            strict: StrictHash::from_bytes([1; 32]),
            fuzzy: FuzzyHash::from_bytes([2; 8]),
            jpeg: vec![0xff, 0xd8, 0xff],
            depth: 0,
        };

        let receipt = publisher.publish(&post).unwrap();
        assert_eq!(receipt.post_id, "t3_k2x9q1");

        let outbox = temp_dir.path().join("outbox");
        assert_eq!(fs::read(outbox.join("k2x9q1.jpg")).unwrap(), vec![0xff, 0xd8, 0xff]);
        let sidecar: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(outbox.join("k2x9q1.json")).unwrap()).unwrap();
        assert_eq!(sidecar["possibly_sensitive"], true);
        assert_eq!(sidecar["image"], "k2x9q1.jpg");
    }
}
