use crate::core::record::PostId;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

/// Age limit applied when the batch is too small to derive one.
pub const DEFAULT_MAX_AGE_SECS: i64 = 168 * 60 * 60;

/// Titles longer than this are not worth mirroring.
pub const DEFAULT_TITLE_MAX_LEN: usize = 257;

/// One raw post from the ranked feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: PostId,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub subreddit: String,
    pub score: i64,
    pub upvote_ratio: f64,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub is_self: bool,
    #[serde(default)]
    pub stickied: bool,
    #[serde(default)]
    pub locked: bool,
    #[serde(default)]
    pub nsfw: bool,
    #[serde(default)]
    pub spoiler: bool,
}

/// Whether `url` points at something we can download as an image.
pub fn is_image_url(url: &str) -> bool {
    url.ends_with(".png")
        || url.ends_with(".jpg")
        || url.starts_with("https://imgur.com/")
        || url.starts_with("http://imgur.com/")
}

impl Candidate {
    /// Checks that do not depend on the rest of the batch.
    pub fn is_structurally_eligible(&self, title_max_len: usize) -> bool {
        !self.is_self
            && !self.stickied
            && !self.locked
            && is_image_url(&self.url)
            && self.title.chars().count() <= title_max_len
    }

    pub fn metrics(&self, rank_index: usize, now: DateTime<Utc>) -> CandidateMetrics {
        let age_seconds = (now - self.created_utc).num_seconds();
        // clamp so a post created "now" does not divide by zero
        let age_hours = age_seconds.max(1) as f64 / 3600.0;
        CandidateMetrics {
            score: self.score,
            vote_ratio_percent: (self.upvote_ratio * 100.0) as i64,
            age_seconds,
            rate_per_hour: self.score as f64 / age_hours,
            rank_index,
        }
    }
}

/// Per-candidate numbers the thresholds are computed from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CandidateMetrics {
    pub score: i64,
    pub vote_ratio_percent: i64,
    pub age_seconds: i64,
    pub rate_per_hour: f64,
    pub rank_index: usize,
}

/// Admission cutoffs derived from one batch. `None` means unconstrained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
    pub score_min: Option<i64>,
    pub rate_min: Option<f64>,
    pub ratio_min: Option<i64>,
    pub age_min: Option<i64>,
    pub age_max: i64,
    pub rank_cap: usize,
}

impl Thresholds {
    /// Derives cutoffs from the batch's own distribution.
    pub fn derive(samples: &[CandidateMetrics]) -> Self {
        let n = samples.len();

        let mut scores: Vec<i64> = samples.iter().map(|m| m.score).collect();
        let mut rates: Vec<f64> = samples.iter().map(|m| m.rate_per_hour).collect();
        let mut ratios: Vec<i64> = samples.iter().map(|m| m.vote_ratio_percent).collect();
        let mut ages: Vec<i64> = samples.iter().map(|m| m.age_seconds).collect();
        scores.sort_unstable();
        rates.sort_unstable_by(f64::total_cmp);
        ratios.sort_unstable();
        ages.sort_unstable();

        let (score_min, rate_min) = if n >= 7 {
            (Some(scores[n / 3 - 1]), Some(rates[n / 3 - 1]))
        } else {
            (None, None)
        };
        let ratio_min = (n >= 11).then(|| ratios[n / 10 - 1]);
        let age_min = (n >= 7).then(|| ages[n / 6 - 1]);
        let age_max = if n >= 31 {
            ages[(n - 1) - n / 30]
        } else {
            DEFAULT_MAX_AGE_SECS
        };

        Self {
            score_min,
            rate_min,
            ratio_min,
            age_min,
            age_max,
            rank_cap: rank_cap(n),
        }
    }

    /// Metric checks only; structure and rank are handled by the filter.
    pub fn admits(&self, m: &CandidateMetrics) -> bool {
        self.ratio_min.is_none_or(|min| m.vote_ratio_percent >= min)
            && self.score_min.is_none_or(|min| m.score >= min)
            && self.rate_min.is_none_or(|min| m.rate_per_hour >= min)
            && self.age_min.is_none_or(|min| m.age_seconds >= min)
            && m.age_seconds <= self.age_max
    }
}

/// Deepest rank selection may reach, tightening faster as the batch grows.
pub fn rank_cap(n: usize) -> usize {
    if n > 60 {
        let n = n as f64;
        (n - ((n / 15.0).powi(2) - n / 4.0)) as usize
    } else {
        n
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Raw items examined at most.
    pub depth_cap: usize,
    /// Stop sampling once this many eligible items were seen.
    pub sample_limit: usize,
    pub title_max_len: usize,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            depth_cap: 100,
            sample_limit: 100,
            title_max_len: DEFAULT_TITLE_MAX_LEN,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FilterOutcome<'a> {
    pub admitted: Vec<&'a Candidate>,
    pub samples: usize,
    pub thresholds: Thresholds,
}

impl FilterOutcome<'_> {
    /// No raw item was usable at all, as opposed to none passing the cutoffs.
    pub fn is_starved(&self) -> bool {
        self.samples == 0
    }
}

/// Narrows a ranked batch to the candidates worth hashing.
#[derive(Debug, Clone, Copy, Default)]
pub struct AdaptiveFilter {
    pub config: FilterConfig,
}

impl AdaptiveFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self { config }
    }

    pub fn filter<'a>(&self, candidates: &'a [Candidate], now: DateTime<Utc>) -> FilterOutcome<'a> {
        let raw = &candidates[..candidates.len().min(self.config.depth_cap)];
        let eligible: Vec<&Candidate> = raw
            .iter()
            .filter(|c| c.is_structurally_eligible(self.config.title_max_len))
            .collect();

        let samples: Vec<CandidateMetrics> = eligible
            .iter()
            .take(self.config.sample_limit)
            .enumerate()
            .map(|(rank, c)| c.metrics(rank, now))
            .collect();

        let thresholds = Thresholds::derive(&samples);
        log_thresholds(samples.len(), &thresholds);

        // ranks are 0-based, so rank >= rank_cap is past the cap
        let admitted: Vec<&Candidate> = eligible
            .iter()
            .enumerate()
            .take_while(|(rank, _)| *rank < thresholds.rank_cap)
            .filter(|(rank, c)| thresholds.admits(&c.metrics(*rank, now)))
            .map(|(_, c)| *c)
            .collect();

        if samples.is_empty() {
            warn!("No posts were usable for image mirroring");
        } else {
            info!(
                "{} / {} posts met the automatically selected posting criteria",
                admitted.len(),
                samples.len()
            );
        }

        FilterOutcome {
            admitted,
            samples: samples.len(),
            thresholds,
        }
    }
}

fn log_thresholds(samples: usize, t: &Thresholds) {
    info!("{} posts were usable for image mirroring", samples);
    if let (Some(score), Some(rate)) = (t.score_min, t.rate_min) {
        info!("Minimum score: {}, minimum rate: {:.1}/hour", score, rate);
    }
    if let Some(ratio) = t.ratio_min {
        info!("Minimum upvote ratio: {:.2}", ratio as f64 / 100.0);
    }
    if let Some(age) = t.age_min {
        info!("Minimum post age: {}s", age);
    }
    info!("Maximum post age: {}s, maximum rank: {}", t.age_max, t.rank_cap);
}
