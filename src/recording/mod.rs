pub mod coordinator;
pub mod session;
pub mod snapshot;
pub mod tiff_stack;
pub mod writer;

pub use coordinator::Coordinator;
pub use session::{FileFormat, Notification, RecordState, RecordType, SessionRequest};
pub use writer::{FrameSink, SinkFactory, StackWriter, WriterReport};
