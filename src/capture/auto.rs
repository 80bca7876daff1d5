// Automatic backend selection
// Reads the session environment once, probes candidates in preference order
// and pins the winner for the lifetime of the process.

use once_cell::sync::OnceCell;

use super::types::{CaptureResult, MonitorInfo};
use super::{make_portal, make_wlr, make_x11, BackendKind, CaptureBackend};

/// Presence of the session-identifying environment markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSignals {
    pub wayland: bool,
    pub x11: bool,
}

impl SessionSignals {
    pub fn from_env() -> Self {
        Self {
            wayland: std::env::var("WAYLAND_DISPLAY").is_ok(),
            x11: std::env::var("DISPLAY").is_ok(),
        }
    }
}

/// Pick a backend for the detected session.
///
/// Wayland prefers wlr-screencopy and falls back to the portal. A Wayland
/// session never drops to x11: XWayland would only capture X clients, so
/// failing outright is more honest than a misleading half-screen image.
fn select_backend(
    signals: SessionSignals,
    mut make: impl FnMut(BackendKind) -> Option<Box<dyn CaptureBackend>>,
) -> Option<Box<dyn CaptureBackend>> {
    if signals.x11 && !signals.wayland {
        if let Some(backend) = make(BackendKind::X11).filter(|b| b.is_available()) {
            log::debug!("auto backend selected: x11");
            return Some(backend);
        }
    } else if signals.wayland {
        if let Some(backend) = make(BackendKind::Wlr).filter(|b| b.is_available()) {
            log::debug!("auto backend selected: wlr-screencopy");
            return Some(backend);
        }
        log::info!("compositor does not expose wlr-screencopy, trying portal");
        if let Some(backend) = make(BackendKind::Portal).filter(|b| b.is_available()) {
            log::debug!("auto backend selected: portal");
            return Some(backend);
        }
        log::warn!("neither wlr-screencopy nor the portal backend is available");
    }
    log::error!("auto backend selection failed: no available backend");
    None
}

/// Backend that defers to the best available concrete mechanism
pub struct AutoBackend {
    portal_interactive: bool,
    selected: OnceCell<Option<Box<dyn CaptureBackend>>>,
}

impl AutoBackend {
    pub fn new(portal_interactive: bool) -> Self {
        Self {
            portal_interactive,
            selected: OnceCell::new(),
        }
    }

    /// Probe once, then reuse the decision for every later call
    fn selected(&self) -> Option<&dyn CaptureBackend> {
        let interactive = self.portal_interactive;
        self.selected
            .get_or_init(|| {
                select_backend(SessionSignals::from_env(), |kind| match kind {
                    BackendKind::X11 => make_x11(),
                    BackendKind::Wlr => make_wlr(),
                    BackendKind::Portal => make_portal(interactive),
                    BackendKind::Auto => None,
                })
            })
            .as_deref()
    }
}

impl CaptureBackend for AutoBackend {
    fn name(&self) -> &str {
        self.selected().map_or("auto", |b| b.name())
    }

    fn is_available(&self) -> bool {
        self.selected().is_some()
    }

    fn list_monitors(&self) -> Vec<MonitorInfo> {
        self.selected().map_or_else(Vec::new, |b| b.list_monitors())
    }

    fn capture_once(&self, monitor: Option<&str>) -> CaptureResult {
        self.selected()
            .map_or_else(CaptureResult::default, |b| b.capture_once(monitor))
    }
}
