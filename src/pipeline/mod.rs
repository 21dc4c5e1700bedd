pub mod acquisition;
pub mod filters;
pub mod ringbuf;

pub use acquisition::{Acquisition, CameraShared, DeviceControl};
pub use filters::FilterPipeline;
pub use ringbuf::{AddOutcome, FrameBuffer, TargetReached};
