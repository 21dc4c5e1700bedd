pub mod camera;
pub mod frame;
pub mod registry;
pub mod roi;
pub mod simulated;
#[cfg(feature = "v4l2")]
pub mod v4l2;

pub use camera::{Camera, ParamValue, Parameter};
pub use frame::{Frame, FrameShape, PixelFormat};
pub use registry::CameraSpec;
pub use roi::Roi;
pub use simulated::{SimulatedCamera, SimulatedConfig};
