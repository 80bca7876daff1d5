// Wayland wlr-screencopy capture
// Opens a private connection per call, binds the screencopy manager and asks
// the compositor to copy each output into an anonymous shm buffer. Only the
// two 32-bit little-endian shm layouts every wlroots compositor offers are
// accepted; everything else is rejected rather than guessed at.

use std::os::fd::AsFd;

use memmap2::MmapMut;
use wayland_client::protocol::{wl_buffer, wl_output, wl_registry, wl_shm, wl_shm_pool};
use wayland_client::{delegate_noop, Connection, Dispatch, EventQueue, Proxy, QueueHandle, WEnum};
use wayland_protocols::xdg::xdg_output::zv1::client::{zxdg_output_manager_v1, zxdg_output_v1};
use wayland_protocols_wlr::screencopy::v1::client::{
    zwlr_screencopy_frame_v1, zwlr_screencopy_manager_v1,
};

use super::types::{CaptureResult, MonitorInfo, RgbaFrame};
use super::{compositor, resolve_monitor_index, CaptureBackend, CaptureError};

/// One output advertised by the compositor, with geometry merged from
/// wl_output and (when present) xdg-output
struct OutputEntry {
    output: wl_output::WlOutput,
    xdg: Option<zxdg_output_v1::ZxdgOutputV1>,
    info: MonitorInfo,
}

/// Buffer parameters announced by the compositor for one frame
#[derive(Debug, Clone, Copy)]
struct BufferParams {
    format: wl_shm::Format,
    width: u32,
    height: u32,
    stride: u32,
}

/// Shm buffer backing one frame copy
struct ShmSlot {
    buffer: wl_buffer::WlBuffer,
    mmap: MmapMut,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum CopyStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

/// State of the copy in flight.
///
/// Protocol version 3 announces all buffer kinds and then buffer_done, so
/// allocation waits for buffer_done there; older compositors never send it
/// and allocation happens on the buffer event itself. Both orderings funnel
/// through `allocate_and_copy`.
#[derive(Default)]
struct PendingCopy {
    params: Option<BufferParams>,
    buffer_done: bool,
    y_invert: bool,
    status: CopyStatus,
    slot: Option<ShmSlot>,
}

#[derive(Default)]
struct CaptureContext {
    shm: Option<wl_shm::WlShm>,
    manager: Option<zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1>,
    xdg_manager: Option<zxdg_output_manager_v1::ZxdgOutputManagerV1>,
    outputs: Vec<OutputEntry>,
    copy: PendingCopy,
}

impl CaptureContext {
    fn monitors(&self) -> Vec<MonitorInfo> {
        self.outputs.iter().map(|entry| entry.info.clone()).collect()
    }

    fn allocate_and_copy(
        &mut self,
        frame: &zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
        qh: &QueueHandle<Self>,
    ) {
        if self.copy.slot.is_some() || self.copy.status != CopyStatus::Pending {
            return;
        }
        let Some(params) = self.copy.params else {
            return;
        };
        let Some(shm) = self.shm.clone() else {
            log::error!("wlr: wl_shm global missing");
            self.copy.status = CopyStatus::Failed;
            return;
        };
        match create_shm_slot(&shm, params, qh) {
            Ok(slot) => {
                frame.copy(&slot.buffer);
                self.copy.slot = Some(slot);
            }
            Err(e) => {
                log::error!("wlr: {}", e);
                self.copy.status = CopyStatus::Failed;
            }
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for CaptureContext {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            match interface.as_str() {
                "wl_shm" => {
                    state.shm = Some(registry.bind::<wl_shm::WlShm, _, _>(name, 1, qh, ()));
                }
                "wl_output" => {
                    let output =
                        registry.bind::<wl_output::WlOutput, _, _>(name, version.min(4), qh, ());
                    state.outputs.push(OutputEntry {
                        output,
                        xdg: None,
                        info: MonitorInfo::default(),
                    });
                }
                "zwlr_screencopy_manager_v1" => {
                    state.manager = Some(
                        registry.bind::<zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1, _, _>(
                            name,
                            version.min(3),
                            qh,
                            (),
                        ),
                    );
                }
                "zxdg_output_manager_v1" => {
                    state.xdg_manager = Some(
                        registry.bind::<zxdg_output_manager_v1::ZxdgOutputManagerV1, _, _>(
                            name,
                            version.min(3),
                            qh,
                            (),
                        ),
                    );
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<wl_output::WlOutput, ()> for CaptureContext {
    fn event(
        state: &mut Self,
        output: &wl_output::WlOutput,
        event: wl_output::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(entry) = state.outputs.iter_mut().find(|e| e.output == *output) else {
            return;
        };
        match event {
            wl_output::Event::Geometry { x, y, .. } => {
                entry.info.x = x;
                entry.info.y = y;
            }
            wl_output::Event::Mode {
                flags,
                width,
                height,
                ..
            } => {
                if matches!(flags, WEnum::Value(f) if f.contains(wl_output::Mode::Current)) {
                    entry.info.width = width;
                    entry.info.height = height;
                }
            }
            wl_output::Event::Scale { factor } => {
                entry.info.scale = factor as f32;
            }
            wl_output::Event::Name { name } => {
                if !name.is_empty() {
                    entry.info.name = name;
                }
            }
            wl_output::Event::Done => {
                if entry.info.name.is_empty() {
                    entry.info.name = "wl_output".to_string();
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<zxdg_output_v1::ZxdgOutputV1, ()> for CaptureContext {
    fn event(
        state: &mut Self,
        xdg: &zxdg_output_v1::ZxdgOutputV1,
        event: zxdg_output_v1::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        let Some(entry) = state.outputs.iter_mut().find(|e| e.xdg.as_ref() == Some(xdg)) else {
            return;
        };
        match event {
            // Logical coordinates account for output scaling and rotation.
            zxdg_output_v1::Event::LogicalPosition { x, y } => {
                entry.info.x = x;
                entry.info.y = y;
            }
            zxdg_output_v1::Event::LogicalSize { width, height } => {
                entry.info.width = width;
                entry.info.height = height;
            }
            zxdg_output_v1::Event::Name { name } => {
                if !name.is_empty() {
                    entry.info.name = name;
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1, ()> for CaptureContext {
    fn event(
        state: &mut Self,
        frame: &zwlr_screencopy_frame_v1::ZwlrScreencopyFrameV1,
        event: zwlr_screencopy_frame_v1::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        use zwlr_screencopy_frame_v1::Event;
        match event {
            Event::Buffer {
                format,
                width,
                height,
                stride,
            } => match format {
                WEnum::Value(format) => {
                    state.copy.params = Some(BufferParams {
                        format,
                        width,
                        height,
                        stride,
                    });
                    if state.copy.buffer_done || frame.version() < 3 {
                        state.allocate_and_copy(frame, qh);
                    }
                }
                WEnum::Unknown(raw) => {
                    log::error!("wlr: compositor offered unknown shm format {:#x}", raw);
                    state.copy.status = CopyStatus::Failed;
                }
            },
            Event::Flags { flags } => {
                state.copy.y_invert = matches!(
                    flags,
                    WEnum::Value(f) if f.contains(zwlr_screencopy_frame_v1::Flags::YInvert)
                );
            }
            Event::BufferDone => {
                state.copy.buffer_done = true;
                if state.copy.params.is_some() {
                    state.allocate_and_copy(frame, qh);
                }
            }
            Event::Ready { .. } => {
                state.copy.status = CopyStatus::Ready;
            }
            Event::Failed => {
                state.copy.status = CopyStatus::Failed;
            }
            _ => {}
        }
    }
}

delegate_noop!(CaptureContext: ignore wl_shm::WlShm);
delegate_noop!(CaptureContext: ignore wl_buffer::WlBuffer);
delegate_noop!(CaptureContext: wl_shm_pool::WlShmPool);
delegate_noop!(CaptureContext: zwlr_screencopy_manager_v1::ZwlrScreencopyManagerV1);
delegate_noop!(CaptureContext: zxdg_output_manager_v1::ZxdgOutputManagerV1);

/// Create the shm pool and buffer the compositor will copy into
fn create_shm_slot(
    shm: &wl_shm::WlShm,
    params: BufferParams,
    qh: &QueueHandle<CaptureContext>,
) -> Result<ShmSlot, CaptureError> {
    let size = params.stride as u64 * params.height as u64;
    if size == 0 || size > i32::MAX as u64 {
        return Err(CaptureError::ProtocolError(format!(
            "bad shm buffer size {size}"
        )));
    }
    let file = tempfile::tempfile()
        .map_err(|e| CaptureError::InitError(format!("Failed to create shm file: {}", e)))?;
    file.set_len(size)
        .map_err(|e| CaptureError::InitError(format!("Failed to size shm file: {}", e)))?;
    let mmap = unsafe { MmapMut::map_mut(&file) }
        .map_err(|e| CaptureError::InitError(format!("Failed to map shm file: {}", e)))?;

    let pool = shm.create_pool(file.as_fd(), size as i32, qh, ());
    let buffer = pool.create_buffer(
        0,
        params.width as i32,
        params.height as i32,
        params.stride as i32,
        params.format,
        qh,
        (),
    );
    pool.destroy();

    Ok(ShmSlot { buffer, mmap })
}

/// Normalize a finished shm copy to tightly packed RGBA8.
///
/// Pixels are little-endian 32-bit words, so memory order is B, G, R, A.
/// XRGB discards the undefined high byte and comes out fully opaque.
fn convert_shm_frame(
    data: &[u8],
    format: wl_shm::Format,
    width: u32,
    height: u32,
    stride: u32,
    y_invert: bool,
) -> Result<RgbaFrame, CaptureError> {
    if !matches!(format, wl_shm::Format::Argb8888 | wl_shm::Format::Xrgb8888) {
        return Err(CaptureError::UnsupportedFormat(format!("{:?}", format)));
    }
    let w = width as usize;
    let h = height as usize;
    let stride = stride as usize;
    if stride < w * 4 || data.len() < stride * h {
        return Err(CaptureError::ProtocolError(format!(
            "short shm buffer: {} bytes for {}x{} stride {}",
            data.len(),
            w,
            h,
            stride
        )));
    }
    let opaque = format == wl_shm::Format::Xrgb8888;

    let mut rgba = vec![0u8; w * h * 4];
    for y in 0..h {
        let src_y = if y_invert { h - 1 - y } else { y };
        let row = &data[src_y * stride..src_y * stride + w * 4];
        let dst = &mut rgba[y * w * 4..(y + 1) * w * 4];
        for (src_px, dst_px) in row.chunks_exact(4).zip(dst.chunks_exact_mut(4)) {
            let pixel = u32::from_le_bytes([src_px[0], src_px[1], src_px[2], src_px[3]]);
            dst_px[0] = ((pixel >> 16) & 0xFF) as u8;
            dst_px[1] = ((pixel >> 8) & 0xFF) as u8;
            dst_px[2] = (pixel & 0xFF) as u8;
            dst_px[3] = if opaque {
                255
            } else {
                ((pixel >> 24) & 0xFF) as u8
            };
        }
    }
    Ok(RgbaFrame::new(width, height, rgba))
}

/// Live connection state shared by the probe, listing and capture paths
struct Session {
    queue: EventQueue<CaptureContext>,
    state: CaptureContext,
}

/// Connect, bind globals and settle output geometry
fn open_session() -> Result<Session, CaptureError> {
    let conn = Connection::connect_to_env().map_err(|e| {
        CaptureError::InitError(format!("Failed to connect to Wayland display: {}", e))
    })?;
    let mut queue = conn.new_event_queue();
    let qh = queue.handle();
    conn.display().get_registry(&qh, ());

    let mut state = CaptureContext::default();
    queue
        .roundtrip(&mut state)
        .map_err(|e| CaptureError::ProtocolError(format!("registry roundtrip failed: {}", e)))?;
    queue
        .roundtrip(&mut state)
        .map_err(|e| CaptureError::ProtocolError(format!("output roundtrip failed: {}", e)))?;

    if let Some(xdg_manager) = state.xdg_manager.clone() {
        for entry in &mut state.outputs {
            entry.xdg = Some(xdg_manager.get_xdg_output(&entry.output, &qh, ()));
        }
        queue.roundtrip(&mut state).map_err(|e| {
            CaptureError::ProtocolError(format!("xdg-output roundtrip failed: {}", e))
        })?;
    }

    // No primary concept in the protocol; use the first advertised output.
    if let Some(first) = state.outputs.first_mut() {
        first.info.primary = true;
    }

    Ok(Session { queue, state })
}

/// Copy one output and block until the compositor reports ready or failed
fn capture_output(session: &mut Session, index: usize) -> Result<RgbaFrame, CaptureError> {
    let manager = session.state.manager.clone().ok_or_else(|| {
        CaptureError::InitError("compositor does not expose zwlr_screencopy_manager_v1".to_string())
    })?;
    let output = session.state.outputs[index].output.clone();
    let qh = session.queue.handle();

    session.state.copy = PendingCopy::default();
    let frame = manager.capture_output(0, &output, &qh, ());

    while session.state.copy.status == CopyStatus::Pending {
        session
            .queue
            .blocking_dispatch(&mut session.state)
            .map_err(|e| {
                CaptureError::ProtocolError(format!("wayland dispatch failed: {}", e))
            })?;
    }

    let copy = std::mem::take(&mut session.state.copy);
    let result = finish_copy(&copy);
    if let Some(slot) = &copy.slot {
        slot.buffer.destroy();
    }
    frame.destroy();
    result
}

fn finish_copy(copy: &PendingCopy) -> Result<RgbaFrame, CaptureError> {
    if copy.status == CopyStatus::Failed {
        return Err(CaptureError::ProtocolError(
            "compositor reported copy failure".to_string(),
        ));
    }
    let params = copy.params.ok_or_else(|| {
        CaptureError::ProtocolError("copy finished without buffer parameters".to_string())
    })?;
    let slot = copy
        .slot
        .as_ref()
        .ok_or_else(|| CaptureError::ProtocolError("copy finished without a buffer".to_string()))?;
    convert_shm_frame(
        &slot.mmap,
        params.format,
        params.width,
        params.height,
        params.stride,
        copy.y_invert,
    )
}

/// wlr-screencopy capture backend
pub struct WlrScreencopyBackend;

impl WlrScreencopyBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for WlrScreencopyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for WlrScreencopyBackend {
    fn name(&self) -> &str {
        "wlr-screencopy"
    }

    fn is_available(&self) -> bool {
        if std::env::var("WAYLAND_DISPLAY").is_err() {
            return false;
        }
        match open_session() {
            Ok(session) => session.state.manager.is_some(),
            Err(e) => {
                log::debug!("wlr: probe failed: {}", e);
                false
            }
        }
    }

    fn list_monitors(&self) -> Vec<MonitorInfo> {
        match open_session() {
            Ok(session) => session.state.monitors(),
            Err(e) => {
                log::error!("wlr: {}", e);
                Vec::new()
            }
        }
    }

    fn capture_once(&self, monitor: Option<&str>) -> CaptureResult {
        let mut session = match open_session() {
            Ok(session) => session,
            Err(e) => {
                log::error!("wlr: {}", e);
                return CaptureResult::default();
            }
        };
        let mut result = CaptureResult {
            monitors: session.state.monitors(),
            ..Default::default()
        };
        if session.state.manager.is_none() || session.state.shm.is_none() {
            log::error!("wlr: missing screencopy manager or shm global");
            return result;
        }

        if monitor == Some("all") && !result.monitors.is_empty() {
            let images: Vec<RgbaFrame> = (0..result.monitors.len())
                .map(|i| {
                    capture_output(&mut session, i).unwrap_or_else(|e| {
                        log::error!(
                            "wlr: capture failed for output {}: {}",
                            result.monitors[i].name,
                            e
                        );
                        RgbaFrame::empty()
                    })
                })
                .collect();
            match compositor::composite(&images, &mut result.monitors) {
                Ok(image) => result.image = image,
                Err(e) => log::error!("wlr: {}", e),
            }
            return result;
        }

        result.selected = resolve_monitor_index(&result.monitors, monitor);
        let Some(index) = result.selected else {
            log::error!("wlr: no output selected for capture");
            return result;
        };
        match capture_output(&mut session, index) {
            Ok(image) => result.image = image,
            Err(e) => log::error!("wlr: capture failed: {}", e),
        }
        result
    }
}
