// X11 framebuffer capture
// Grabs the root window with GetImage and normalizes whatever pixel layout
// the server advertises to RGBA8. Monitor geometry comes from RandR.

use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat, ImageOrder, Screen};
use x11rb::rust_connection::RustConnection;

use super::types::{CaptureResult, MonitorInfo, RgbaFrame};
use super::{compositor, resolve_monitor_index, CaptureBackend, CaptureError};

/// Channel extraction parameters derived from a visual's bit mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ChannelMask {
    mask: u32,
    shift: u32,
    max: u32,
}

impl ChannelMask {
    fn new(mask: u32) -> Self {
        let shift = if mask != 0 { mask.trailing_zeros() } else { 0 };
        Self {
            mask,
            shift,
            max: mask >> shift,
        }
    }

    /// Widen a channel of any depth to 8 bits
    fn extract(&self, pixel: u32) -> u8 {
        if self.max == 0 {
            return 0;
        }
        let value = (pixel & self.mask) >> self.shift;
        ((value as u64 * 255) / self.max as u64) as u8
    }
}

/// Pixel layout of a GetImage reply, resolved from the server setup
#[derive(Debug, Clone, Copy)]
struct PixelLayout {
    bits_per_pixel: u8,
    scanline_pad: u8,
    little_endian: bool,
    red: ChannelMask,
    green: ChannelMask,
    blue: ChannelMask,
}

impl PixelLayout {
    /// Row length in bytes, honoring the server's scanline padding
    fn stride(&self, width: u32) -> usize {
        let bits = width as usize * self.bits_per_pixel as usize;
        let pad = self.scanline_pad.max(8) as usize;
        bits.div_ceil(pad) * pad / 8
    }
}

/// Convert a ZPixmap reply to tightly packed RGBA8.
///
/// Channels are widened from the mask depth to 8 bits so a 5-bit full-scale
/// red comes out as 255, not 248. Alpha is always opaque since the root
/// window has no meaningful alpha.
fn zpixmap_to_rgba(
    data: &[u8],
    width: u32,
    height: u32,
    layout: &PixelLayout,
) -> Result<RgbaFrame, CaptureError> {
    let bpp = layout.bits_per_pixel as usize;
    if bpp % 8 != 0 || !(16..=32).contains(&bpp) {
        return Err(CaptureError::UnsupportedFormat(format!(
            "{bpp} bits per pixel"
        )));
    }
    let bytes = bpp / 8;
    let stride = layout.stride(width);
    let w = width as usize;
    let h = height as usize;
    if data.len() < stride * h {
        return Err(CaptureError::ProtocolError(format!(
            "short GetImage reply: {} bytes for {}x{} stride {}",
            data.len(),
            w,
            h,
            stride
        )));
    }

    let mut rgba = vec![0u8; w * h * 4];
    for y in 0..h {
        let row = &data[y * stride..];
        for x in 0..w {
            let px = &row[x * bytes..x * bytes + bytes];
            let mut pixel: u32 = 0;
            if layout.little_endian {
                for (i, b) in px.iter().enumerate() {
                    pixel |= (*b as u32) << (8 * i);
                }
            } else {
                for b in px {
                    pixel = (pixel << 8) | *b as u32;
                }
            }
            let idx = (y * w + x) * 4;
            rgba[idx] = layout.red.extract(pixel);
            rgba[idx + 1] = layout.green.extract(pixel);
            rgba[idx + 2] = layout.blue.extract(pixel);
            rgba[idx + 3] = 255;
        }
    }
    Ok(RgbaFrame::new(width, height, rgba))
}

/// Resolve the pixel layout for a reply of the given depth and visual
fn resolve_layout(
    conn: &RustConnection,
    screen: &Screen,
    depth: u8,
    visual_id: u32,
) -> Result<PixelLayout, CaptureError> {
    let setup = conn.setup();
    let format = setup
        .pixmap_formats
        .iter()
        .find(|f| f.depth == depth)
        .ok_or_else(|| {
            CaptureError::UnsupportedFormat(format!("no pixmap format for depth {depth}"))
        })?;
    let visual = screen
        .allowed_depths
        .iter()
        .flat_map(|d| d.visuals.iter())
        .find(|v| v.visual_id == visual_id)
        .ok_or_else(|| CaptureError::ProtocolError(format!("unknown visual {visual_id}")))?;

    Ok(PixelLayout {
        bits_per_pixel: format.bits_per_pixel,
        scanline_pad: format.scanline_pad,
        little_endian: setup.image_byte_order == ImageOrder::LSB_FIRST,
        red: ChannelMask::new(visual.red_mask),
        green: ChannelMask::new(visual.green_mask),
        blue: ChannelMask::new(visual.blue_mask),
    })
}

/// Capture one rectangle of the root window
fn grab_rect(
    conn: &RustConnection,
    screen: &Screen,
    x: i32,
    y: i32,
    width: i32,
    height: i32,
) -> Result<RgbaFrame, CaptureError> {
    if width <= 0 || height <= 0 {
        return Err(CaptureError::ProtocolError(format!(
            "invalid capture rectangle {width}x{height}"
        )));
    }
    let reply = conn
        .get_image(
            ImageFormat::Z_PIXMAP,
            screen.root,
            x as i16,
            y as i16,
            width as u16,
            height as u16,
            !0,
        )
        .map_err(|e| CaptureError::ProtocolError(format!("GetImage request failed: {}", e)))?
        .reply()
        .map_err(|e| {
            CaptureError::ProtocolError(format!(
                "GetImage failed (permissions or remote session?): {}",
                e
            ))
        })?;

    let layout = resolve_layout(conn, screen, reply.depth, reply.visual)?;
    zpixmap_to_rgba(&reply.data, width as u32, height as u32, &layout)
}

/// Enumerate connected RandR outputs with an active CRTC
fn enumerate_monitors(
    conn: &RustConnection,
    screen: &Screen,
) -> Result<Vec<MonitorInfo>, CaptureError> {
    let resources = conn
        .randr_get_screen_resources_current(screen.root)
        .map_err(|e| CaptureError::ProtocolError(format!("RandR resources failed: {}", e)))?
        .reply()
        .map_err(|e| CaptureError::ProtocolError(format!("RandR resources failed: {}", e)))?;
    let primary = conn
        .randr_get_output_primary(screen.root)
        .ok()
        .and_then(|cookie| cookie.reply().ok())
        .map_or(0, |reply| reply.output);

    let mut monitors = Vec::new();
    for &output in &resources.outputs {
        let Ok(cookie) = conn.randr_get_output_info(output, resources.config_timestamp) else {
            continue;
        };
        let Ok(info) = cookie.reply() else {
            continue;
        };
        if info.connection != randr::Connection::CONNECTED || info.crtc == 0 {
            continue;
        }
        let Ok(cookie) = conn.randr_get_crtc_info(info.crtc, resources.config_timestamp) else {
            continue;
        };
        let Ok(crtc) = cookie.reply() else {
            continue;
        };
        monitors.push(MonitorInfo {
            name: String::from_utf8_lossy(&info.name).into_owned(),
            x: crtc.x as i32,
            y: crtc.y as i32,
            width: crtc.width as i32,
            height: crtc.height as i32,
            scale: 1.0,
            primary: output == primary,
        });
    }
    Ok(monitors)
}

/// X11 capture backend
pub struct X11Backend;

impl X11Backend {
    pub fn new() -> Self {
        Self
    }

    fn connect() -> Result<(RustConnection, usize), CaptureError> {
        RustConnection::connect(None)
            .map_err(|e| CaptureError::InitError(format!("Failed to connect to X11: {}", e)))
    }
}

impl Default for X11Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for X11Backend {
    fn name(&self) -> &str {
        "x11"
    }

    fn is_available(&self) -> bool {
        if std::env::var("DISPLAY").is_err() {
            return false;
        }
        Self::connect().is_ok()
    }

    fn list_monitors(&self) -> Vec<MonitorInfo> {
        let (conn, screen_num) = match Self::connect() {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("x11: {}", e);
                return Vec::new();
            }
        };
        let screen = &conn.setup().roots[screen_num];
        match enumerate_monitors(&conn, screen) {
            Ok(monitors) => monitors,
            Err(e) => {
                log::warn!("x11: monitor enumeration failed: {}", e);
                Vec::new()
            }
        }
    }

    fn capture_once(&self, monitor: Option<&str>) -> CaptureResult {
        let (conn, screen_num) = match Self::connect() {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("x11: {}", e);
                return CaptureResult::default();
            }
        };
        let screen = &conn.setup().roots[screen_num];

        let monitors = enumerate_monitors(&conn, screen).unwrap_or_else(|e| {
            // No RandR: fall back to the full root window below.
            log::warn!("x11: monitor enumeration failed: {}", e);
            Vec::new()
        });
        let mut result = CaptureResult {
            monitors,
            ..Default::default()
        };

        if monitor == Some("all") && !result.monitors.is_empty() {
            let images: Vec<RgbaFrame> = result
                .monitors
                .iter()
                .map(|m| {
                    grab_rect(&conn, screen, m.x, m.y, m.width, m.height).unwrap_or_else(|e| {
                        log::error!("x11: capture failed for output {}: {}", m.name, e);
                        RgbaFrame::empty()
                    })
                })
                .collect();
            match compositor::composite(&images, &mut result.monitors) {
                Ok(image) => result.image = image,
                Err(e) => log::error!("x11: {}", e),
            }
            return result;
        }

        result.selected = resolve_monitor_index(&result.monitors, monitor);
        let (x, y, width, height) = match result.selected.and_then(|i| result.monitors.get(i)) {
            Some(m) => (m.x, m.y, m.width, m.height),
            None => (
                0,
                0,
                screen.width_in_pixels as i32,
                screen.height_in_pixels as i32,
            ),
        };

        match grab_rect(&conn, screen, x, y, width, height) {
            Ok(image) => result.image = image,
            Err(e) => log::error!("x11: {}", e),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(bpp: u8, pad: u8, little_endian: bool, r: u32, g: u32, b: u32) -> PixelLayout {
        PixelLayout {
            bits_per_pixel: bpp,
            scanline_pad: pad,
            little_endian,
            red: ChannelMask::new(r),
            green: ChannelMask::new(g),
            blue: ChannelMask::new(b),
        }
    }

    #[test]
    fn test_channel_mask_widens_to_full_scale() {
        let red = ChannelMask::new(0xF800);
        assert_eq!(red.shift, 11);
        assert_eq!(red.max, 31);
        // Full-scale 5-bit value must widen to 255, not 248
        assert_eq!(red.extract(0xF800), 255);
        assert_eq!(red.extract(0x0800), 255 / 31);
        assert_eq!(red.extract(0), 0);
    }

    #[test]
    fn test_zero_mask_extracts_black() {
        let none = ChannelMask::new(0);
        assert_eq!(none.extract(0xFFFF_FFFF), 0);
    }

    #[test]
    fn test_rgb565_little_endian() {
        let layout = layout(16, 16, true, 0xF800, 0x07E0, 0x001F);
        // Pixels: pure red, pure green, pure blue, white
        let data: Vec<u8> = [0xF800u16, 0x07E0, 0x001F, 0xFFFF]
            .iter()
            .flat_map(|px| px.to_le_bytes())
            .collect();

        let frame = zpixmap_to_rgba(&data, 4, 1, &layout).unwrap();
        assert_eq!(&frame.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&frame.data[4..8], &[0, 255, 0, 255]);
        assert_eq!(&frame.data[8..12], &[0, 0, 255, 255]);
        assert_eq!(&frame.data[12..16], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_depth24_little_endian_bgrx_bytes() {
        let layout = layout(32, 32, true, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF);
        // 0x00CC8844 in memory as LE bytes: 44 88 CC 00
        let data = vec![0x44, 0x88, 0xCC, 0x00];

        let frame = zpixmap_to_rgba(&data, 1, 1, &layout).unwrap();
        assert_eq!(&frame.data[..], &[0xCC, 0x88, 0x44, 255]);
    }

    #[test]
    fn test_depth24_big_endian_reads_msb_first() {
        let layout = layout(32, 32, false, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF);
        let data = vec![0x00, 0xCC, 0x88, 0x44];

        let frame = zpixmap_to_rgba(&data, 1, 1, &layout).unwrap();
        assert_eq!(&frame.data[..], &[0xCC, 0x88, 0x44, 255]);
    }

    #[test]
    fn test_scanline_pad_skipped_between_rows() {
        let layout = layout(16, 32, true, 0xF800, 0x07E0, 0x001F);
        // Width 3 at 16bpp pads each row to 8 bytes
        assert_eq!(layout.stride(3), 8);
        let mut data = vec![0u8; 16];
        // Row 0: red, green, blue, then 2 pad bytes; row 1: all white
        data[0..2].copy_from_slice(&0xF800u16.to_le_bytes());
        data[2..4].copy_from_slice(&0x07E0u16.to_le_bytes());
        data[4..6].copy_from_slice(&0x001Fu16.to_le_bytes());
        for px in 0..3 {
            data[8 + px * 2..10 + px * 2].copy_from_slice(&0xFFFFu16.to_le_bytes());
        }

        let frame = zpixmap_to_rgba(&data, 3, 2, &layout).unwrap();
        assert_eq!(&frame.data[0..4], &[255, 0, 0, 255]);
        assert_eq!(&frame.data[8..12], &[0, 0, 255, 255]);
        assert_eq!(&frame.data[12..16], &[255, 255, 255, 255]);
        assert_eq!(&frame.data[20..24], &[255, 255, 255, 255]);
    }

    #[test]
    fn test_unsupported_depth_is_rejected() {
        let layout = layout(8, 8, true, 0, 0, 0);
        let err = zpixmap_to_rgba(&[0u8; 4], 2, 2, &layout).unwrap_err();
        assert!(matches!(err, CaptureError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_short_reply_is_rejected() {
        let layout = layout(32, 32, true, 0x00FF_0000, 0x0000_FF00, 0x0000_00FF);
        let err = zpixmap_to_rgba(&[0u8; 4], 2, 2, &layout).unwrap_err();
        assert!(matches!(err, CaptureError::ProtocolError(_)));
    }

    #[test]
    fn test_backend_name() {
        assert_eq!(X11Backend::new().name(), "x11");
    }
}
