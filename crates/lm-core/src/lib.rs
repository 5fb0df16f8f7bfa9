mod artifact;
mod job;

pub use artifact::{
    Artifact, BulkArtifact, BulkListing, BulkOptions, BulkSource, DEFAULT_CONTENT_TYPE,
    InlinePayload, ModelFile, TrainingFile, guess_content_type,
};
pub use job::{Job, JobHandle, JobKind, JobStatus};
