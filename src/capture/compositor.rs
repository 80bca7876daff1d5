//! Multi-monitor canvas compositor
//!
//! Stitches per-monitor captures onto one canvas sized to the union bounding
//! box of the monitor rectangles. Gaps between monitors stay opaque black so
//! the output has no transparent holes, and captures whose pixel size differs
//! from the reported monitor size (fractional scaling) are resampled first.

use super::types::{MonitorInfo, RgbaFrame};
use super::CaptureError;

/// Union bounding box over monitor rectangles, in desktop coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl Bounds {
    pub fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> i32 {
        self.max_y - self.min_y
    }
}

/// Compute the union bounding box of all monitors with a usable rectangle.
///
/// Monitors that report no size borrow the pixel size of their captured
/// image, and that correction is written back so callers see the geometry
/// that was actually stitched. Monitors with no usable rectangle at all are
/// left out of the bounds.
fn resolve_bounds(images: &[RgbaFrame], monitors: &mut [MonitorInfo]) -> Option<Bounds> {
    let mut bounds: Option<Bounds> = None;
    for (image, monitor) in images.iter().zip(monitors.iter_mut()) {
        if monitor.width <= 0 || monitor.height <= 0 {
            if image.is_empty() {
                continue;
            }
            monitor.width = image.width as i32;
            monitor.height = image.height as i32;
        }
        let (x0, y0) = (monitor.x, monitor.y);
        let (x1, y1) = (monitor.x + monitor.width, monitor.y + monitor.height);
        bounds = Some(match bounds {
            None => Bounds {
                min_x: x0,
                min_y: y0,
                max_x: x1,
                max_y: y1,
            },
            Some(b) => Bounds {
                min_x: b.min_x.min(x0),
                min_y: b.min_y.min(y0),
                max_x: b.max_x.max(x1),
                max_y: b.max_y.max(y1),
            },
        });
    }
    bounds.filter(|b| b.max_x > b.min_x && b.max_y > b.min_y)
}

/// Stitch per-monitor captures onto a single canvas.
///
/// `images[i]` belongs to `monitors[i]`. Failed captures arrive as empty
/// frames and leave their region black instead of aborting the whole stitch.
pub fn composite(
    images: &[RgbaFrame],
    monitors: &mut [MonitorInfo],
) -> Result<RgbaFrame, CaptureError> {
    if images.len() != monitors.len() {
        return Err(CaptureError::CompositeError(format!(
            "{} captures for {} monitors",
            images.len(),
            monitors.len()
        )));
    }

    let bounds = resolve_bounds(images, monitors).ok_or_else(|| {
        CaptureError::CompositeError("failed to compute output bounds".to_string())
    })?;

    let total_w = bounds.width() as usize;
    let total_h = bounds.height() as usize;

    // Opaque black canvas; monitor gaps must not come out transparent.
    let mut canvas = vec![0u8; total_w * total_h * 4];
    for pixel in canvas.chunks_exact_mut(4) {
        pixel[3] = 255;
    }

    blit_all(&mut canvas, total_w, total_h, images, monitors, bounds);

    Ok(RgbaFrame::new(total_w as u32, total_h as u32, canvas))
}

/// Copy every non-empty capture into its monitor's slot on the canvas
fn blit_all(
    canvas: &mut [u8],
    total_w: usize,
    total_h: usize,
    images: &[RgbaFrame],
    monitors: &[MonitorInfo],
    bounds: Bounds,
) {
    for (image, monitor) in images.iter().zip(monitors.iter()) {
        if image.is_empty() {
            continue;
        }

        let scaled;
        let frame = if image.width as i32 != monitor.width || image.height as i32 != monitor.height
        {
            scaled = scale_bilinear(image, monitor.width.max(0) as u32, monitor.height.max(0) as u32);
            &scaled
        } else {
            image
        };
        if frame.is_empty() {
            continue;
        }

        let offset_x = monitor.x - bounds.min_x;
        let offset_y = monitor.y - bounds.min_y;
        if offset_x < 0 || offset_y < 0 {
            log::warn!(
                "skipping monitor {} at uncovered offset {},{}",
                monitor.name,
                offset_x,
                offset_y
            );
            continue;
        }
        let offset_x = offset_x as usize;
        let offset_y = offset_y as usize;
        if offset_x >= total_w || offset_y >= total_h {
            continue;
        }

        let src_w = frame.width as usize;
        let src_h = frame.height as usize;
        let copy_w = src_w.min(total_w - offset_x);
        let copy_h = src_h.min(total_h - offset_y);

        for row in 0..copy_h {
            let src_start = row * src_w * 4;
            let dst_start = ((offset_y + row) * total_w + offset_x) * 4;
            canvas[dst_start..dst_start + copy_w * 4]
                .copy_from_slice(&frame.data[src_start..src_start + copy_w * 4]);
        }
    }
}

/// Resample a frame with bilinear interpolation.
///
/// Source corners map exactly onto destination corners and sampling clamps at
/// the edges, so no border pixel is ever invented.
pub fn scale_bilinear(src: &RgbaFrame, dst_width: u32, dst_height: u32) -> RgbaFrame {
    if src.is_empty() || dst_width == 0 || dst_height == 0 {
        return RgbaFrame::empty();
    }
    if src.width == dst_width && src.height == dst_height {
        return src.clone();
    }

    let src_w = src.width as usize;
    let src_h = src.height as usize;
    let dst_w = dst_width as usize;
    let dst_h = dst_height as usize;

    let x_ratio = if dst_w > 1 && src_w > 1 {
        (src_w - 1) as f64 / (dst_w - 1) as f64
    } else {
        0.0
    };
    let y_ratio = if dst_h > 1 && src_h > 1 {
        (src_h - 1) as f64 / (dst_h - 1) as f64
    } else {
        0.0
    };

    let mut dst = vec![0u8; dst_w * dst_h * 4];

    for dst_y in 0..dst_h {
        let src_y_f = dst_y as f64 * y_ratio;
        let src_y0 = src_y_f as usize;
        let src_y1 = (src_y0 + 1).min(src_h - 1);
        let y_frac = src_y_f - src_y0 as f64;

        for dst_x in 0..dst_w {
            let src_x_f = dst_x as f64 * x_ratio;
            let src_x0 = src_x_f as usize;
            let src_x1 = (src_x0 + 1).min(src_w - 1);
            let x_frac = src_x_f - src_x0 as f64;

            // Four surrounding pixels
            let idx00 = (src_y0 * src_w + src_x0) * 4;
            let idx01 = (src_y0 * src_w + src_x1) * 4;
            let idx10 = (src_y1 * src_w + src_x0) * 4;
            let idx11 = (src_y1 * src_w + src_x1) * 4;

            let dst_idx = (dst_y * dst_w + dst_x) * 4;
            for c in 0..4 {
                let v00 = src.data[idx00 + c] as f64;
                let v01 = src.data[idx01 + c] as f64;
                let v10 = src.data[idx10 + c] as f64;
                let v11 = src.data[idx11 + c] as f64;

                let v0 = v00 * (1.0 - x_frac) + v01 * x_frac;
                let v1 = v10 * (1.0 - x_frac) + v11 * x_frac;
                let v = v0 * (1.0 - y_frac) + v1 * y_frac;

                dst[dst_idx + c] = (v + 0.5).clamp(0.0, 255.0) as u8;
            }
        }
    }

    RgbaFrame::new(dst_width, dst_height, dst)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> RgbaFrame {
        let mut data = Vec::with_capacity(width as usize * height as usize * 4);
        for _ in 0..width * height {
            data.extend_from_slice(&rgba);
        }
        RgbaFrame::new(width, height, data)
    }

    fn monitor(name: &str, x: i32, y: i32, width: i32, height: i32) -> MonitorInfo {
        MonitorInfo {
            name: name.to_string(),
            x,
            y,
            width,
            height,
            scale: 1.0,
            primary: false,
        }
    }

    fn pixel(frame: &RgbaFrame, x: usize, y: usize) -> [u8; 4] {
        let idx = (y * frame.width as usize + x) * 4;
        [
            frame.data[idx],
            frame.data[idx + 1],
            frame.data[idx + 2],
            frame.data[idx + 3],
        ]
    }

    #[test]
    fn test_two_monitor_stitch_dimensions_and_fill() {
        // Side-by-side 1920x1080 + 1280x1024 desktop
        let mut monitors = vec![
            monitor("DP-1", 0, 0, 1920, 1080),
            monitor("HDMI-1", 1920, 0, 1280, 1024),
        ];
        let images = vec![
            solid(1920, 1080, [10, 20, 30, 255]),
            solid(1280, 1024, [40, 50, 60, 255]),
        ];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas.width, 3200);
        assert_eq!(canvas.height, 1080);

        assert_eq!(pixel(&canvas, 0, 0), [10, 20, 30, 255]);
        assert_eq!(pixel(&canvas, 1919, 1079), [10, 20, 30, 255]);
        assert_eq!(pixel(&canvas, 1920, 0), [40, 50, 60, 255]);
        assert_eq!(pixel(&canvas, 3199, 1023), [40, 50, 60, 255]);
        // The short monitor leaves opaque black below row 1023
        assert_eq!(pixel(&canvas, 2500, 1050), [0, 0, 0, 255]);
    }

    #[test]
    fn test_single_monitor_stitch_matches_source() {
        let mut monitors = vec![monitor("DP-1", 100, 50, 3, 2)];
        let source = solid(3, 2, [11, 22, 33, 255]);
        let images = vec![source.clone()];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas, source);
    }

    #[test]
    fn test_failed_capture_leaves_region_black() {
        // Middle monitor of three fails; bounds and neighbors are unaffected
        let mut monitors = vec![
            monitor("DP-1", 0, 0, 4, 4),
            monitor("DP-2", 4, 0, 4, 4),
            monitor("HDMI-1", 8, 0, 4, 4),
        ];
        let images = vec![
            solid(4, 4, [200, 0, 0, 255]),
            RgbaFrame::empty(),
            solid(4, 4, [0, 0, 200, 255]),
        ];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas.width, 12);
        assert_eq!(canvas.height, 4);
        assert_eq!(pixel(&canvas, 1, 1), [200, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 5, 1), [0, 0, 0, 255]);
        assert_eq!(pixel(&canvas, 9, 1), [0, 0, 200, 255]);
    }

    #[test]
    fn test_negative_origin_is_normalized() {
        let mut monitors = vec![
            monitor("DP-1", -4, 0, 4, 2),
            monitor("HDMI-1", 0, 0, 4, 2),
        ];
        let images = vec![solid(4, 2, [1, 1, 1, 255]), solid(4, 2, [2, 2, 2, 255])];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas.width, 8);
        assert_eq!(canvas.height, 2);
        assert_eq!(pixel(&canvas, 0, 0), [1, 1, 1, 255]);
        assert_eq!(pixel(&canvas, 4, 0), [2, 2, 2, 255]);
    }

    #[test]
    fn test_overlapping_monitors_union_bounds() {
        // Overlapping rectangles still produce the union box; in the overlap
        // the later monitor wins.
        let mut monitors = vec![
            monitor("DP-1", 0, 0, 4, 4),
            monitor("HDMI-1", 2, 0, 4, 4),
        ];
        let images = vec![solid(4, 4, [1, 1, 1, 255]), solid(4, 4, [2, 2, 2, 255])];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas.width, 6);
        assert_eq!(canvas.height, 4);
        assert_eq!(pixel(&canvas, 0, 0), [1, 1, 1, 255]);
        assert_eq!(pixel(&canvas, 3, 1), [2, 2, 2, 255]);
        assert_eq!(pixel(&canvas, 5, 3), [2, 2, 2, 255]);
    }

    #[test]
    fn test_monitor_outside_bounds_is_skipped() {
        // Force an offset left of the canvas origin: the blit must skip the
        // monitor rather than wrap or panic.
        let monitors = vec![monitor("DP-1", 0, 0, 2, 2)];
        let images = vec![solid(2, 2, [9, 9, 9, 255])];
        let bounds = Bounds {
            min_x: 10,
            min_y: 0,
            max_x: 12,
            max_y: 2,
        };

        let mut canvas = vec![0u8; 2 * 2 * 4];
        blit_all(&mut canvas, 2, 2, &images, &monitors, bounds);
        assert!(canvas.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_size_fallback_uses_image_and_writes_back() {
        let mut monitors = vec![monitor("DP-1", 0, 0, 0, 0)];
        let images = vec![solid(6, 3, [7, 8, 9, 255])];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas.width, 6);
        assert_eq!(canvas.height, 3);
        assert_eq!(monitors[0].width, 6);
        assert_eq!(monitors[0].height, 3);
        assert_eq!(pixel(&canvas, 5, 2), [7, 8, 9, 255]);
    }

    #[test]
    fn test_no_usable_rectangle_is_an_error() {
        let mut monitors = vec![monitor("DP-1", 0, 0, 0, 0)];
        let images = vec![RgbaFrame::empty()];
        assert!(composite(&images, &mut monitors).is_err());
    }

    #[test]
    fn test_count_mismatch_is_an_error() {
        let mut monitors = vec![monitor("DP-1", 0, 0, 2, 2)];
        let images: Vec<RgbaFrame> = Vec::new();
        assert!(composite(&images, &mut monitors).is_err());
    }

    #[test]
    fn test_scaled_capture_fills_monitor_slot() {
        // A 2x HiDPI capture lands in a monitor advertising logical size
        let mut monitors = vec![monitor("eDP-1", 0, 0, 4, 4)];
        let images = vec![solid(8, 8, [100, 150, 200, 255])];

        let canvas = composite(&images, &mut monitors).unwrap();
        assert_eq!(canvas.width, 4);
        assert_eq!(canvas.height, 4);
        assert_eq!(pixel(&canvas, 3, 3), [100, 150, 200, 255]);
    }

    #[test]
    fn test_scale_identity_returns_clone() {
        let src = solid(3, 3, [5, 6, 7, 255]);
        let out = scale_bilinear(&src, 3, 3);
        assert_eq!(out, src);
    }

    #[test]
    fn test_scale_downsample_is_corner_exact() {
        // 4x4 with distinct corners; (src-1)/(dst-1) maps corners onto corners
        let mut data = vec![0u8; 4 * 4 * 4];
        let corners = [(0usize, 0usize, 10u8), (3, 0, 20), (0, 3, 30), (3, 3, 40)];
        for &(x, y, v) in &corners {
            let idx = (y * 4 + x) * 4;
            data[idx] = v;
            data[idx + 3] = 255;
        }
        let src = RgbaFrame::new(4, 4, data);

        let out = scale_bilinear(&src, 2, 2);
        assert_eq!(pixel(&out, 0, 0)[0], 10);
        assert_eq!(pixel(&out, 1, 0)[0], 20);
        assert_eq!(pixel(&out, 0, 1)[0], 30);
        assert_eq!(pixel(&out, 1, 1)[0], 40);
    }

    #[test]
    fn test_scale_upsample_blends_midpoints() {
        // 2x2 -> 3x3 puts the new samples exactly halfway between neighbors
        let mut data = vec![0u8; 2 * 2 * 4];
        for (i, v) in [0u8, 100, 200, 50].iter().enumerate() {
            data[i * 4] = *v;
            data[i * 4 + 3] = 255;
        }
        let src = RgbaFrame::new(2, 2, data);

        let out = scale_bilinear(&src, 3, 3);
        assert_eq!(pixel(&out, 0, 0)[0], 0);
        assert_eq!(pixel(&out, 2, 0)[0], 100);
        assert_eq!(pixel(&out, 0, 2)[0], 200);
        assert_eq!(pixel(&out, 2, 2)[0], 50);
        assert_eq!(pixel(&out, 1, 0)[0], 50);
        assert_eq!(pixel(&out, 0, 1)[0], 100);
        assert_eq!(pixel(&out, 1, 1)[0], 88);
    }

    #[test]
    fn test_scale_single_pixel_source_floods() {
        let src = solid(1, 1, [42, 43, 44, 255]);
        let out = scale_bilinear(&src, 3, 2);
        assert_eq!(out.width, 3);
        assert_eq!(out.height, 2);
        for y in 0..2 {
            for x in 0..3 {
                assert_eq!(pixel(&out, x, y), [42, 43, 44, 255]);
            }
        }
    }
}
