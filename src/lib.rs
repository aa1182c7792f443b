pub mod config;
pub mod core;
pub mod services;

pub use crate::config::AppConfig;
pub use crate::core::filter::{AdaptiveFilter, Candidate, CandidateMetrics, FilterConfig, Thresholds};
pub use crate::core::hash::{FuzzyHash, PerceptualHash, StrictHash};
pub use crate::core::matcher::{SimilarityMatcher, Verdict};
pub use crate::core::record::PostId;
pub use crate::core::store::{DuplicateStore, ReadOnlyLog, StoreError};
