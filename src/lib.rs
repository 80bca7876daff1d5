// Stillshot - still-frame screen capture for X11 and Wayland
// Main library entry point

pub mod capture;

pub use capture::{
    create_backend, list_monitors, request_capture, BackendKind, CaptureBackend, CaptureError,
    CaptureResult, MonitorInfo, RgbaFrame,
};
