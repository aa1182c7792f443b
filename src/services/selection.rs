use crate::core::filter::Candidate;
use crate::core::hash::{FuzzyHash, StrictHash};
use crate::core::matcher::{SimilarityMatcher, Verdict, similarity_percent};
use crate::core::store::{DuplicateStore, RecordLog, StoreError};
use crate::services::imaging::{HashedImage, ImagePipeline, ImagingError, encode_jpeg};
use crate::services::source::{FetchError, ImageFetcher, normalize_image_url};
use log::{debug, info, warn};
use std::time::Duration;
use thiserror::Error;

/// JPEG quality used when re-encoding the chosen image.
pub const JPEG_QUALITY: u8 = 100;

/// Search depth used when the store's age is unknown.
pub const DEFAULT_SEARCH_DEPTH: usize = 50;

#[derive(Debug, Error)]
pub enum SelectionError {
    #[error("Store write failed: {0}")]
    Store(#[from] StoreError),
}

/// Why an image could not be evaluated. Never fatal.
#[derive(Debug, Error)]
enum PipelineError {
    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("decode or hash failed: {0}")]
    Imaging(#[from] ImagingError),
}

/// The unique post picked in one pass, ready to publish.
#[derive(Debug, Clone)]
pub struct SelectedPost {
    pub candidate: Candidate,
    pub source_url: String,
    pub strict: StrictHash,
    pub fuzzy: FuzzyHash,
    pub jpeg: Vec<u8>,
    /// Position in the admitted list where it was found.
    pub depth: usize,
}

/// How deep to search: grows with the square root of the minutes since the
/// store last changed, never below `speed`.
pub fn search_depth_budget(speed: f64, since_modified: Option<Duration>) -> usize {
    match since_modified {
        Some(elapsed) => {
            let minutes = elapsed.as_secs_f64() / 60.0;
            let depth = (speed * minutes.sqrt()) as usize;
            depth.max(speed as usize)
        }
        None => DEFAULT_SEARCH_DEPTH,
    }
}

/// Walks the admitted candidates and returns the first one whose image is new.
pub struct Selector<'a, F, P> {
    fetcher: &'a F,
    pipeline: &'a P,
    matcher: SimilarityMatcher,
}

impl<'a, F: ImageFetcher, P: ImagePipeline> Selector<'a, F, P> {
    pub fn new(fetcher: &'a F, pipeline: &'a P, matcher: SimilarityMatcher) -> Self {
        Self {
            fetcher,
            pipeline,
            matcher,
        }
    }

    /// Returns `Ok(None)` when nothing unique was found within `depth_budget`.
    /// Only a failed store write is an error.
    pub fn select_unique<L: RecordLog>(
        &self,
        admitted: &[&Candidate],
        store: &mut DuplicateStore<L>,
        depth_budget: usize,
    ) -> Result<Option<SelectedPost>, SelectionError> {
        let search_depth = admitted.len().min(depth_budget);
        if admitted.len() > depth_budget {
            info!("Limiting search depth to {} posts", depth_budget);
        }

        for (depth, candidate) in admitted.iter().take(search_depth).enumerate() {
            let id = &candidate.id;
            if store.contains_identity(id) {
                continue;
            }
            info!(
                "Potentially unique post {} found at depth {} / {}",
                id, depth, search_depth
            );

            let source_url = normalize_image_url(&candidate.url);
            let hashed = match self.prepare(&source_url) {
                Ok(hashed) => hashed,
                Err(e) => {
                    warn!("Skipping {}: {}", id, e);
                    store.record_identity_only(id)?;
                    continue;
                }
            };

            let verdict = self
                .matcher
                .evaluate(store, id, &hashed.strict, &hashed.fuzzy);
            match verdict {
                Verdict::ExactDuplicate => {
                    info!("Duplicate image detected (strict perceptual), skipping {}", id);
                }
                Verdict::FuzzyDuplicate { distance } => {
                    info!(
                        "Similar image detected (fuzzy perceptual, similarity {:.2}%), skipping {}",
                        similarity_percent(distance),
                        id
                    );
                }
                Verdict::Unique => {
                    info!(
                        "Image ({}) is unique, recording {}",
                        hashed
                            .format
                            .map(|f| format!("{f:?}").to_lowercase())
                            .unwrap_or_else(|| "unknown".to_string()),
                        id
                    );
                }
            }
            self.matcher
                .record_verdict(store, id, &hashed.strict, &hashed.fuzzy, verdict)?;
            debug!("Store now holds {} post IDs", store.stats().identities);

            if !verdict.is_unique() {
                continue;
            }
            match encode_jpeg(&hashed.image, JPEG_QUALITY) {
                Ok(jpeg) => {
                    return Ok(Some(SelectedPost {
                        candidate: (*candidate).clone(),
                        source_url,
                        strict: hashed.strict,
                        fuzzy: hashed.fuzzy,
                        jpeg,
                        depth,
                    }));
                }
                Err(e) => warn!("Cannot re-encode {} as JPEG, skipping: {}", id, e),
            }
        }

        warn!("No unique posts were found");
        Ok(None)
    }

    fn prepare(&self, url: &str) -> Result<HashedImage, PipelineError> {
        let bytes = self.fetcher.fetch(url)?;
        Ok(self.pipeline.decode_and_hash(&bytes)?)
    }
}
