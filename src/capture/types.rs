// Shared capture data types
// Every backend produces the same frame and monitor shapes so callers never
// need to know which mechanism ran.

use serde::{Deserialize, Serialize};

/// One captured frame, tightly packed 8-bit RGBA
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RgbaFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl RgbaFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize * 4);
        Self {
            width,
            height,
            data,
        }
    }

    /// The zero-size frame used to signal capture failure
    pub fn empty() -> Self {
        Self::default()
    }

    /// A frame is empty exactly when it has no pixels
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.data.is_empty()
    }
}

/// Monitor information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorInfo {
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub scale: f32,
    pub primary: bool,
}

impl Default for MonitorInfo {
    fn default() -> Self {
        Self {
            name: String::new(),
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            scale: 1.0,
            primary: false,
        }
    }
}

/// Outcome of a single capture request
///
/// `image` is empty when the capture failed; `monitors` still carries whatever
/// geometry the backend managed to enumerate. `selected` is the index of the
/// captured monitor, or None when the whole desktop was stitched or the
/// backend has no monitor concept.
#[derive(Debug, Clone, Default)]
pub struct CaptureResult {
    pub image: RgbaFrame,
    pub monitors: Vec<MonitorInfo>,
    pub selected: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_frame_is_empty() {
        assert!(RgbaFrame::empty().is_empty());
        assert!(RgbaFrame::default().is_empty());
    }

    #[test]
    fn test_filled_frame_is_not_empty() {
        let frame = RgbaFrame::new(2, 1, vec![0; 8]);
        assert!(!frame.is_empty());
        assert_eq!(frame.width, 2);
        assert_eq!(frame.height, 1);
    }

    #[test]
    fn test_monitor_defaults_to_unit_scale() {
        let info = MonitorInfo::default();
        assert_eq!(info.scale, 1.0);
        assert!(!info.primary);
    }

    #[test]
    fn test_default_result_reports_failure() {
        let result = CaptureResult::default();
        assert!(result.image.is_empty());
        assert!(result.monitors.is_empty());
        assert_eq!(result.selected, None);
    }

    #[test]
    fn test_monitor_info_serializes_by_field_name() {
        let info = MonitorInfo {
            name: "DP-1".to_string(),
            x: 1920,
            y: 0,
            width: 2560,
            height: 1440,
            scale: 1.0,
            primary: true,
        };
        let json = serde_json::to_string(&info).unwrap();
        assert!(json.contains("\"name\":\"DP-1\""));
        assert!(json.contains("\"primary\":true"));
        let back: MonitorInfo = serde_json::from_str(&json).unwrap();
        assert_eq!(back, info);
    }
}
