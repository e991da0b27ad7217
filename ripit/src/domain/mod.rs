//! Domain model shared by the lanes, the pipeline and the store.

pub mod event;
pub mod media_file;
pub mod task;

pub use event::{BROADCAST_TASK_ID, EventKind, QueueSnapshot, TaskEvent};
pub use media_file::{
    Chapter, DATA_CURRENT_FORMAT_VERSION, ExtData, MediaFileData, MediaStatus, SourceFile, Track,
};
pub use task::{Lane, Task, TaskEnvelope, TaskKind};
