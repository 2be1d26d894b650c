pub mod detection;
pub mod sample;
pub mod status;
pub mod verdict;

pub use detection::{DetectionEvent, RemoteLog};
pub use sample::{FrameSample, Sample, SampleKind, TextSample};
pub use status::ChildStatus;
pub use verdict::{RiskCategory, Verdict};
