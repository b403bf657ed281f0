//! Post-processing of streamed answers into durable artifacts

pub mod finisher;
pub mod markdown;

pub use finisher::{
    ArtifactStore, ArtifactTarget, FinishError, FsArtifactStore, ResponseFinisher, RunArtifact,
};
pub use markdown::{strip_markdown, word_count};
