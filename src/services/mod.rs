pub mod imaging;
pub mod mirror;
pub mod publish;
pub mod schedule;
pub mod selection;
pub mod source;

pub use imaging::PerceptualPipeline;
pub use mirror::{MirrorJob, PassOutcome};
pub use publish::DirectoryPublisher;
pub use schedule::Scheduler;
pub use selection::Selector;
pub use source::{FsImageFetcher, JsonFileSource};
