//! Persisted queue store, its serialized writer and backups.

pub mod queue;
pub mod rotation;
pub mod validation;
pub mod writer;

pub use queue::QueueStore;
pub use rotation::BackupRotation;
pub use validation::{InvalidRecord, Validated, validated_clone};
pub use writer::SafeFileWriter;
