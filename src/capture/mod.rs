// Screen capture module
// Backends: X11 (GetImage), Wayland (wlr-screencopy), desktop portal (D-Bus)

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

pub mod auto;
pub mod compositor;
pub mod types;

#[cfg(feature = "portal")]
pub mod portal;
#[cfg(feature = "wayland")]
pub mod wayland;
#[cfg(feature = "x11")]
pub mod x11;

pub use types::{CaptureResult, MonitorInfo, RgbaFrame};

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to initialize capture: {0}")]
    InitError(String),
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Failed to decode image: {0}")]
    DecodeError(String),
    #[error("Failed to composite monitors: {0}")]
    CompositeError(String),
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
}

/// Capture backend trait - implemented per platform mechanism.
///
/// Capture is a single still frame; an empty image in the result is the
/// failure signal, with details already logged by the backend.
pub trait CaptureBackend: Send + Sync {
    /// Stable identifier used in logs and selection messages
    fn name(&self) -> &str;

    /// Cheap probe that the mechanism can work in the current session
    fn is_available(&self) -> bool;

    /// Monitors visible to this mechanism; empty if it has no monitor concept
    fn list_monitors(&self) -> Vec<MonitorInfo>;

    /// Capture one frame. `monitor` selects an output by name, "all" stitches
    /// every monitor onto one canvas, None takes the default output.
    fn capture_once(&self, monitor: Option<&str>) -> CaptureResult;
}

/// Backend selector for the factory and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Auto,
    X11,
    Wlr,
    Portal,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BackendKind::Auto => "auto",
            BackendKind::X11 => "x11",
            BackendKind::Wlr => "wlr",
            BackendKind::Portal => "portal",
        };
        f.write_str(name)
    }
}

impl FromStr for BackendKind {
    type Err = CaptureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(BackendKind::Auto),
            "x11" => Ok(BackendKind::X11),
            "wlr" => Ok(BackendKind::Wlr),
            "portal" => Ok(BackendKind::Portal),
            other => Err(CaptureError::UnknownBackend(other.to_string())),
        }
    }
}

#[cfg(feature = "x11")]
pub(crate) fn make_x11() -> Option<Box<dyn CaptureBackend>> {
    Some(Box::new(x11::X11Backend::new()))
}

#[cfg(not(feature = "x11"))]
pub(crate) fn make_x11() -> Option<Box<dyn CaptureBackend>> {
    None
}

#[cfg(feature = "wayland")]
pub(crate) fn make_wlr() -> Option<Box<dyn CaptureBackend>> {
    Some(Box::new(wayland::WlrScreencopyBackend::new()))
}

#[cfg(not(feature = "wayland"))]
pub(crate) fn make_wlr() -> Option<Box<dyn CaptureBackend>> {
    None
}

#[cfg(feature = "portal")]
pub(crate) fn make_portal(interactive: bool) -> Option<Box<dyn CaptureBackend>> {
    Some(Box::new(portal::PortalBackend::new(interactive)))
}

#[cfg(not(feature = "portal"))]
pub(crate) fn make_portal(_interactive: bool) -> Option<Box<dyn CaptureBackend>> {
    None
}

/// Create the requested backend.
///
/// None means the backend was excluded at build time; auto never fails here
/// because its probing happens lazily on first use.
pub fn create_backend(kind: BackendKind, portal_interactive: bool) -> Option<Box<dyn CaptureBackend>> {
    match kind {
        BackendKind::Auto => Some(Box::new(auto::AutoBackend::new(portal_interactive))),
        BackendKind::X11 => {
            let backend = make_x11();
            if backend.is_none() {
                log::error!("x11 backend disabled at build time");
            }
            backend
        }
        BackendKind::Wlr => {
            let backend = make_wlr();
            if backend.is_none() {
                log::error!("wlr backend disabled at build time");
            }
            backend
        }
        BackendKind::Portal => {
            let backend = make_portal(portal_interactive);
            if backend.is_none() {
                log::error!("portal backend disabled at build time");
            }
            backend
        }
    }
}

/// Resolve a monitor hint against the enumerated monitors.
///
/// An unmatched or missing hint falls back to the first monitor so a stale
/// name still produces a capture. None only when nothing was enumerated.
pub(crate) fn resolve_monitor_index(monitors: &[MonitorInfo], hint: Option<&str>) -> Option<usize> {
    let mut chosen = hint.and_then(|hint| monitors.iter().position(|m| m.name == hint));
    if chosen.is_none() && !monitors.is_empty() {
        chosen = Some(0);
    }
    chosen
}

/// One-shot capture through the requested backend
pub fn request_capture(
    kind: BackendKind,
    monitor: Option<&str>,
    portal_interactive: bool,
) -> CaptureResult {
    match create_backend(kind, portal_interactive) {
        Some(backend) => backend.capture_once(monitor),
        None => CaptureResult::default(),
    }
}

/// One-shot monitor listing through the requested backend
pub fn list_monitors(kind: BackendKind) -> Vec<MonitorInfo> {
    match create_backend(kind, false) {
        Some(backend) => backend.list_monitors(),
        None => Vec::new(),
    }
}
