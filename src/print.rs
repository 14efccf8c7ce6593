//! Print Geometry
//!
//! Maps raster certificates onto PDF pages: one image pixel is `72 / dpi`
//! points, so a page is exactly the size of the image it carries.

use serde::{Deserialize, Serialize};

pub const DEFAULT_DPI: u32 = 96;

/// Resolution used to size PDF pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintSpec {
    pub dpi: u32,
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self { dpi: DEFAULT_DPI }
    }
}

impl PrintSpec {
    /// Create from user input with validation
    pub fn from_user(dpi: u32) -> Result<Self, &'static str> {
        if !(72..=1200).contains(&dpi) {
            return Err("DPI must be between 72 and 1200");
        }
        Ok(Self { dpi })
    }

    /// Page width and height in points for an image of the given pixel size.
    pub fn page_size_pt(&self, width_px: u32, height_px: u32) -> (f32, f32) {
        let scale = 72.0 / self.dpi as f32;
        (width_px as f32 * scale, height_px as f32 * scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_at_default_dpi() {
        let (w, h) = PrintSpec::default().page_size_pt(960, 480);
        assert_eq!((w, h), (720.0, 360.0));
    }

    #[test]
    fn test_page_size_at_72_dpi_is_pixel_size() {
        let spec = PrintSpec::from_user(72).unwrap();
        assert_eq!(spec.page_size_pt(100, 50), (100.0, 50.0));
    }

    #[test]
    fn test_user_dpi_bounds() {
        assert!(PrintSpec::from_user(71).is_err());
        assert!(PrintSpec::from_user(1201).is_err());
        assert!(PrintSpec::from_user(300).is_ok());
    }
}
