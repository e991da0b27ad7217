//! Task execution: handler contract, the two lanes and the dispatcher that routes between them.

pub mod dispatcher;
pub mod emitter;
pub mod handler;
pub mod handlers;
pub mod processor;
pub mod sequential;

pub use dispatcher::TaskDispatcher;
pub use emitter::{EventSink, TaskEmitter};
pub use handler::{TaskContext, TaskHandler, TaskOutcome};
pub use processor::TaskProcessor;
pub use sequential::{SequentialConfig, SequentialTaskProcessor};
