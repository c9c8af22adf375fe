//! Simulated collaborators for crabsurface
//!
//! In-memory stand-ins for the camera service, the GPU, the hardware encoder,
//! the muxer and the hosting application. They keep enough bookkeeping for
//! tests to assert on resource lifetimes, and are complete enough to drive
//! the whole pipeline from the `pipeline-sim` binary.

pub mod devices;
pub mod encoder;
pub mod gpu;
pub mod host;

pub use devices::{Completion, SimCamera, SimDeviceManager};
pub use encoder::{MuxerLog, SimEncoderFactory, SimEncoderHandle, SimMuxerFactory, SimOutput};
pub use gpu::{SimCanvas, SimGpu, SimTexture, WindowSink};
pub use host::{SimHost, SimHostSurface};
