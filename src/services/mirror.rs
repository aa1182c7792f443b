use crate::core::filter::AdaptiveFilter;
use crate::core::matcher::SimilarityMatcher;
use crate::core::store::{DuplicateStore, RecordLog};
use crate::services::imaging::ImagePipeline;
use crate::services::publish::{PublishError, PublishReceipt, Publisher};
use crate::services::selection::{SelectionError, Selector};
use crate::services::source::{CandidateSource, ImageFetcher, SourceError};
use chrono::{DateTime, Utc};
use log::{info, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Unable to fetch candidates: {0}")]
    Source(#[from] SourceError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error("Unable to publish: {0}")]
    Publish(#[from] PublishError),
}

/// What a single pass ended with. Only `Published` produced output.
#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// The listing had no usable posts at all.
    Starved,
    /// Posts were usable but none met this batch's thresholds.
    NoneQualified { samples: usize },
    /// Every admitted post was already seen or a duplicate.
    NoUnique { searched: usize },
    Published(PublishReceipt),
}

impl PassOutcome {
    pub fn receipt(self) -> Option<PublishReceipt> {
        match self {
            PassOutcome::Published(receipt) => Some(receipt),
            _ => None,
        }
    }
}

/// One fetch, filter, select, publish cycle over borrowed collaborators.
pub struct MirrorJob<'a, S, F, P, B> {
    pub source: &'a S,
    pub fetcher: &'a F,
    pub pipeline: &'a P,
    pub publisher: &'a B,
    pub filter: AdaptiveFilter,
    pub matcher: SimilarityMatcher,
}

impl<S, F, P, B> MirrorJob<'_, S, F, P, B>
where
    S: CandidateSource,
    F: ImageFetcher,
    P: ImagePipeline,
    B: Publisher,
{
    pub fn run_once<L: RecordLog>(
        &self,
        store: &mut DuplicateStore<L>,
        depth_budget: usize,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome, MirrorError> {
        let candidates = self.source.fetch_candidates()?;
        let outcome = self.filter.filter(&candidates, now);
        if outcome.is_starved() {
            return Ok(PassOutcome::Starved);
        }
        if outcome.admitted.is_empty() {
            return Ok(PassOutcome::NoneQualified {
                samples: outcome.samples,
            });
        }

        let selector = Selector::new(self.fetcher, self.pipeline, self.matcher);
        let Some(selected) = selector.select_unique(&outcome.admitted, store, depth_budget)? else {
            return Ok(PassOutcome::NoUnique {
                searched: outcome.admitted.len().min(depth_budget),
            });
        };

        info!(
            "Selected {} ({}) at depth {}",
            selected.candidate.id, selected.candidate.title, selected.depth
        );
        match self.publisher.publish(&selected) {
            Ok(receipt) => Ok(PassOutcome::Published(receipt)),
            Err(e) => {
                warn!("Publishing {} failed after it was recorded", selected.candidate.id);
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::filter::Candidate;
    use crate::core::hash::{FuzzyHash, StrictHash};
    use crate::core::record::PostId;
    use crate::services::imaging::{HashedImage, ImagingError};
    use crate::services::selection::SelectedPost;
    use crate::services::source::FetchError;
    use chrono::{Duration, TimeZone};
    use image::DynamicImage;
    use std::cell::RefCell;
    use std::io::Cursor;

    struct FixedSource(Vec<Candidate>);

    impl CandidateSource for FixedSource {
        fn fetch_candidates(&self) -> Result<Vec<Candidate>, SourceError> {
            Ok(self.0.clone())
        }
    }

    /// The URL itself is the "image": its last segment picks the hash.
    struct UrlFetcher;

    impl ImageFetcher for UrlFetcher {
        fn fetch(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            Ok(url.as_bytes().to_vec())
        }
    }

    struct UrlPipeline;

    impl ImagePipeline for UrlPipeline {
        fn decode_and_hash(&self, bytes: &[u8]) -> Result<HashedImage, ImagingError> {
            let byte = *bytes.iter().rev().nth(4).unwrap_or(&0);
            Ok(HashedImage {
                strict: StrictHash::from_bytes([byte; 32]),
                fuzzy: FuzzyHash::from_bytes([byte; 8]),
                format: None,
                image: DynamicImage::new_rgb8(1, 1),
            })
        }
    }

    #[derive(Default)]
    struct MemoryPublisher(RefCell<Vec<String>>);

    impl Publisher for MemoryPublisher {
        fn publish(&self, post: &SelectedPost) -> Result<PublishReceipt, PublishError> {
            self.0.borrow_mut().push(post.candidate.id.to_string());
            Ok(PublishReceipt {
                post_id: post.candidate.id.to_string(),
                location: "memory".to_string(),
            })
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn candidate(name: &str, age_hours: i64) -> Candidate {
        Candidate {
            id: PostId::parse(&format!("t3_{name}")).unwrap(),
            title: format!("Post {name}"),
            url: format!("https://i.redd.it/{name}.jpg"),
            subreddit: "r/pics".to_string(),
            score: 500,
            upvote_ratio: 0.9,
            created_utc: now() - Duration::hours(age_hours),
            is_self: false,
            stickied: false,
            locked: false,
            nsfw: false,
            spoiler: false,
        }
    }

    fn run(source: &FixedSource, publisher: &MemoryPublisher, store: &mut DuplicateStore<Vec<u8>>) -> PassOutcome {
        let job = MirrorJob {
            source,
            fetcher: &UrlFetcher,
            pipeline: &UrlPipeline,
            publisher,
            filter: AdaptiveFilter::default(),
            matcher: SimilarityMatcher::default(),
        };
        job.run_once(store, 50, now()).unwrap()
    }

    #[test]
    fn test_publishes_then_goes_idle() {
        let source = FixedSource(vec![candidate("a", 2), candidate("b", 3)]);
        let publisher = MemoryPublisher::default();
        let mut store = DuplicateStore::load(Cursor::new(Vec::new()), Vec::new()).unwrap();

        let first = run(&source, &publisher, &mut store);
        assert_eq!(first.receipt().unwrap().post_id, "t3_a");
        let second = run(&source, &publisher, &mut store);
        assert_eq!(second.receipt().unwrap().post_id, "t3_b");
        let third = run(&source, &publisher, &mut store);
        assert_eq!(third, PassOutcome::NoUnique { searched: 2 });
        assert_eq!(*publisher.0.borrow(), vec!["t3_a", "t3_b"]);
    }

    #[test]
    fn test_starved_and_unqualified_batches() {
        let publisher = MemoryPublisher::default();
        let mut store = DuplicateStore::load(Cursor::new(Vec::new()), Vec::new()).unwrap();

        let mut text_post = candidate("t", 2);
        text_post.is_self = true;
        assert_eq!(
            run(&FixedSource(vec![text_post]), &publisher, &mut store),
            PassOutcome::Starved
        );

        let stale = FixedSource(vec![candidate("old", 24 * 10)]);
        assert_eq!(
            run(&stale, &publisher, &mut store),
            PassOutcome::NoneQualified { samples: 1 }
        );
        assert!(publisher.0.borrow().is_empty());
    }
}
