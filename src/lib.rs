//! crabsurface: camera capture, GPU compositing and hardware encoding
//! coordinated by three state machines
//!
//! Each subsystem runs as its own serialized state machine on a dedicated
//! worker thread:
//! - **capture** opens the rear camera and streams into an external texture
//! - **render** owns the GPU scene behind the host's drawing surface
//! - **encode** renders its own copy of the composite into a hardware encoder
//!   and muxes the output to a file
//!
//! Shared GPU resources move between the machines through [`Handoff`], a
//! single-slot, exactly-once value exchange that never blocks the producer.
//!
//! # Usage
//! ```rust,ignore
//! use crabsurface::{Pipeline, PipelineConfig, PipelineDeps};
//!
//! crabsurface::init_logging();
//! let pipeline = Pipeline::new(PipelineConfig::load_or_default(), deps)?;
//! pipeline.create(surface, overlay);
//! pipeline.resume();
//! pipeline.toggle_record();
//! ```
//!
//! The `mp4` feature adds a muxer that writes H.264 streams into MP4 files.

pub mod capture;
pub mod config;
pub mod errors;
pub mod handoff;
pub mod host;
pub mod machine;
pub mod pipeline;
pub mod recording;
pub mod render;
pub mod types;

// Simulated collaborators, shared by tests, benches and the demo binary
pub mod testing;

// Re-exports for convenience
pub use config::PipelineConfig;
pub use errors::PipelineError;
pub use handoff::Handoff;
pub use host::{Host, LoggingHost, Notification};
pub use machine::{Machine, MachineState, Mailbox, StateMachine, Worker};
pub use pipeline::{Pipeline, PipelineDeps};
pub use types::{LensFacing, Rect, Rgba, Rotation, Size};

/// Initialize logging, defaulting to info for this crate
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabsurface=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        mp4: cfg!(feature = "mp4"),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    /// Whether the MP4 muxer is compiled in
    pub mp4: bool,
}
