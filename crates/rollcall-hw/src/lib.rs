//! rollcall-hw: webcam capture for the live attendance session.
//!
//! Provides V4L2-based camera access with conversion of the common webcam
//! pixel formats to packed RGB.

pub mod camera;
pub mod frame;

pub use camera::{Camera, CameraError, CameraStream, DeviceInfo, FrameSource, PixelFormat};
pub use frame::{Frame, FrameError};
