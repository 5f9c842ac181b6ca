pub mod artifacts;
pub mod filesystem;

pub use artifacts::{ArtifactKind, ArtifactStore, StagedArtifact};
pub use filesystem::{StoredUpload, UploadStore};
