//! Core library for the live audio visualiser.
//!
//! Audio flows in fixed-size frames from a capture device, straight back out
//! to a playback device, and in parallel into one of several render modes
//! that lay each frame out as coloured draw primitives. Each module owns a
//! distinct subsystem: device streams, the capture worker, signal utilities,
//! the mode layouts and the controller that ties the selections together.
//! Presentation lives in the application crate behind the [`Surface`] trait.

pub mod config;
pub mod device;
pub mod error;
pub mod modes;
pub mod pipeline;
pub mod render;
pub mod signal;
pub mod visualiser;

pub use config::{AppConfig, AudioConfig, CanvasConfig, VisualConfig};
pub use device::{
    list_input_devices, list_output_devices, AudioFrame, DeviceInfo, InputHandle, OutputHandle,
    OutputRing,
};
pub use error::{Result, VisualiserError};
pub use modes::RenderMode;
pub use pipeline::{frame_channel, render_channel, render_packet, CaptureWorker, RenderPacket};
pub use render::{submit, CanvasSize, Color, DrawPrimitive, Surface};
pub use visualiser::{StateHandle, Visualiser, VisualiserState};
