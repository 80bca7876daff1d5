// Desktop portal screenshot capture
// Calls org.freedesktop.portal.Screenshot on the session bus and reads back
// the file the portal drops. Works on any desktop with xdg-desktop-portal,
// at the cost of no monitor enumeration and a possible user-facing dialog.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use uuid::Uuid;
use zbus::names::BusName;
use zbus::zvariant::{OwnedObjectPath, OwnedValue, Value};

use super::types::{CaptureResult, MonitorInfo, RgbaFrame};
use super::{CaptureBackend, CaptureError};

const PORTAL_BUS: &str = "org.freedesktop.portal.Desktop";
const PORTAL_PATH: &str = "/org/freedesktop/portal/desktop";
const SCREENSHOT_IFACE: &str = "org.freedesktop.portal.Screenshot";
const REQUEST_IFACE: &str = "org.freedesktop.portal.Request";

/// Ceiling for the Screenshot method reply itself
const CALL_TIMEOUT: Duration = Duration::from_secs(5);
/// Ceiling for the Response signal; the portal may be showing a dialog
const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Portal screenshot backend
pub struct PortalBackend {
    interactive: bool,
}

impl PortalBackend {
    pub fn new(interactive: bool) -> Self {
        Self { interactive }
    }

    /// Run the Screenshot request to completion and return the result uri
    fn screenshot_uri(&self) -> Result<String, CaptureError> {
        let interactive = self.interactive;
        let rt = runtime()?;
        rt.block_on(async move {
            let conn = zbus::Connection::session().await.map_err(|e| {
                CaptureError::InitError(format!("Failed to connect to session bus: {}", e))
            })?;

            // Subscribe on the token-derived request path before calling so a
            // fast portal cannot answer before we listen.
            let token = format!("stillshot_{}", Uuid::new_v4().simple());
            let expected_path = request_path(&conn, &token)?;
            let mut responses = response_stream(&conn, &expected_path).await?;

            let mut options: HashMap<&str, Value> = HashMap::new();
            options.insert("interactive", Value::from(interactive));
            options.insert("handle_token", Value::from(token.as_str()));

            let reply = tokio::time::timeout(
                CALL_TIMEOUT,
                conn.call_method(
                    Some(PORTAL_BUS),
                    PORTAL_PATH,
                    Some(SCREENSHOT_IFACE),
                    "Screenshot",
                    &("", options),
                ),
            )
            .await
            .map_err(|_| CaptureError::Timeout("Screenshot method reply".to_string()))?
            .map_err(|e| CaptureError::ProtocolError(format!("Screenshot call failed: {}", e)))?;

            let handle: OwnedObjectPath = reply.body().deserialize().map_err(|e| {
                CaptureError::ProtocolError(format!("unexpected Screenshot reply: {}", e))
            })?;
            if handle.as_str() != expected_path {
                // Older portals hand out their own request path; follow it.
                log::debug!("portal: re-subscribing on handle {}", handle.as_str());
                responses = response_stream(&conn, handle.as_str()).await?;
            }

            let message = tokio::time::timeout(RESPONSE_TIMEOUT, responses.next())
                .await
                .map_err(|_| CaptureError::Timeout("screenshot response".to_string()))?
                .ok_or_else(|| {
                    CaptureError::ProtocolError("response stream closed".to_string())
                })?;

            let (status, results): (u32, HashMap<String, OwnedValue>) =
                message.body().deserialize().map_err(|e| {
                    CaptureError::ProtocolError(format!("malformed response: {}", e))
                })?;
            if status != 0 {
                return Err(CaptureError::ProtocolError(format!(
                    "screenshot cancelled or failed (status {status})"
                )));
            }
            results
                .get("uri")
                .cloned()
                .and_then(|value| String::try_from(value).ok())
                .ok_or_else(|| {
                    CaptureError::ProtocolError("response carries no uri".to_string())
                })
        })
    }
}

impl CaptureBackend for PortalBackend {
    fn name(&self) -> &str {
        "portal-screenshot"
    }

    fn is_available(&self) -> bool {
        match probe_bus() {
            Ok(has_owner) => has_owner,
            Err(e) => {
                log::debug!("portal: probe failed: {}", e);
                false
            }
        }
    }

    fn list_monitors(&self) -> Vec<MonitorInfo> {
        log::warn!("portal: monitor enumeration is not available via the Screenshot portal");
        Vec::new()
    }

    fn capture_once(&self, monitor: Option<&str>) -> CaptureResult {
        if monitor.is_some() {
            log::warn!("portal: monitor selection not supported; the system dialog decides the output");
        }
        let image = self
            .screenshot_uri()
            .and_then(|uri| uri_to_path(&uri))
            .and_then(|path| load_screenshot(&path))
            .unwrap_or_else(|e| {
                log::error!("portal: {}", e);
                RgbaFrame::empty()
            });
        CaptureResult {
            image,
            ..Default::default()
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, CaptureError> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CaptureError::InitError(format!("Failed to start portal runtime: {}", e)))
}

/// Predict the request object path for our handle token
fn request_path(conn: &zbus::Connection, token: &str) -> Result<String, CaptureError> {
    let unique = conn.unique_name().ok_or_else(|| {
        CaptureError::ProtocolError("session bus connection has no unique name".to_string())
    })?;
    let sender = unique.as_str().trim_start_matches(':').replace('.', "_");
    Ok(format!(
        "/org/freedesktop/portal/desktop/request/{sender}/{token}"
    ))
}

async fn response_stream(
    conn: &zbus::Connection,
    path: &str,
) -> Result<zbus::proxy::SignalStream<'static>, CaptureError> {
    let request = zbus::Proxy::new(conn, PORTAL_BUS, path.to_owned(), REQUEST_IFACE)
        .await
        .map_err(|e| CaptureError::ProtocolError(format!("request proxy failed: {}", e)))?;
    request
        .receive_signal("Response")
        .await
        .map_err(|e| CaptureError::ProtocolError(format!("signal subscription failed: {}", e)))
}

/// Whether the portal service has an owner on the session bus
fn probe_bus() -> Result<bool, CaptureError> {
    let rt = runtime()?;
    rt.block_on(async {
        tokio::time::timeout(CALL_TIMEOUT, async {
            let conn = zbus::Connection::session().await.map_err(|e| {
                CaptureError::InitError(format!("Failed to connect to session bus: {}", e))
            })?;
            let dbus = zbus::fdo::DBusProxy::new(&conn)
                .await
                .map_err(|e| CaptureError::ProtocolError(format!("bus proxy failed: {}", e)))?;
            let name = BusName::try_from(PORTAL_BUS)
                .map_err(|e| CaptureError::ProtocolError(format!("bad bus name: {}", e)))?;
            dbus.name_has_owner(name)
                .await
                .map_err(|e| CaptureError::ProtocolError(format!("NameHasOwner failed: {}", e)))
        })
        .await
        .map_err(|_| CaptureError::Timeout("portal availability probe".to_string()))?
    })
}

fn uri_to_path(uri: &str) -> Result<PathBuf, CaptureError> {
    let url = url::Url::parse(uri)
        .map_err(|e| CaptureError::ProtocolError(format!("bad screenshot uri '{uri}': {e}")))?;
    url.to_file_path().map_err(|_| {
        CaptureError::ProtocolError(format!("screenshot uri is not a file path: {uri}"))
    })
}

/// Decode the portal's screenshot file and delete it.
///
/// The portal never cleans up after itself, so the file is removed even when
/// decoding fails.
fn load_screenshot(path: &Path) -> Result<RgbaFrame, CaptureError> {
    let decoded = image::open(path);
    if let Err(e) = fs::remove_file(path) {
        log::warn!("portal: could not remove {}: {}", path.display(), e);
    }
    let image = decoded.map_err(|e| CaptureError::DecodeError(e.to_string()))?;
    let rgba = image.into_rgba8();
    let (width, height) = (rgba.width(), rgba.height());
    Ok(RgbaFrame::new(width, height, rgba.into_raw()))
}
