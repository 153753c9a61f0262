//! Lenticular interlacing: map a quilt onto the native subpixel layout of a calibrated display.
//!
//! Calibration comes from the display's `visual.json`. Each display pixel picks the view whose
//! lens angle it sits under and samples that view's tile at the same normalized position.

use std::path::Path;

use crate::foundation::core::{CHANNELS, Frame, Raster, rgb8_len};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::quilt::compose::tile_origin;
use crate::quilt::spec::QuiltSpec;

/// `visual.json` stores values either bare or wrapped as `{ "value": x }`.
#[derive(Clone, Copy, Debug, serde::Deserialize)]
#[serde(untagged)]
enum CalValue {
    Plain(f64),
    Wrapped { value: f64 },
}

impl CalValue {
    fn get(self) -> f64 {
        match self {
            Self::Plain(v) | Self::Wrapped { value: v } => v,
        }
    }
}

#[derive(serde::Deserialize)]
struct VisualJson {
    #[serde(rename = "screenW")]
    screen_w: CalValue,
    #[serde(rename = "screenH")]
    screen_h: CalValue,
    pitch: CalValue,
    slope: CalValue,
    center: CalValue,
    #[serde(rename = "DPI")]
    dpi: CalValue,
}

/// Lenticular display calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Calibration {
    /// Native display width in pixels.
    pub screen_w: u32,
    /// Native display height in pixels.
    pub screen_h: u32,
    /// Lenticules per inch.
    pub pitch: f64,
    /// Lens slant.
    pub slope: f64,
    /// Phase offset of the center view.
    pub center: f64,
    /// Display pixel density.
    pub dpi: f64,
}

impl Calibration {
    /// Parse a `visual.json` document.
    pub fn from_json(json: &str) -> QuiltResult<Self> {
        let raw: VisualJson = serde_json::from_str(json)
            .map_err(|e| QuiltError::config(format!("invalid calibration json: {e}")))?;
        let cal = Self {
            screen_w: raw.screen_w.get().round() as u32,
            screen_h: raw.screen_h.get().round() as u32,
            pitch: raw.pitch.get(),
            slope: raw.slope.get(),
            center: raw.center.get(),
            dpi: raw.dpi.get(),
        };
        cal.validate()?;
        Ok(cal)
    }

    /// Read and parse a `visual.json` file.
    pub fn load(path: &Path) -> QuiltResult<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            QuiltError::config(format!("cannot read calibration '{}': {e}", path.display()))
        })?;
        Self::from_json(&json)
    }

    /// Check that the calibration can drive [`interlace`].
    pub fn validate(&self) -> QuiltResult<()> {
        if self.screen_w == 0 || self.screen_h == 0 {
            return Err(QuiltError::config("calibration screen size must be non-zero"));
        }
        if !(self.dpi.is_finite() && self.dpi > 0.0) {
            return Err(QuiltError::config("calibration DPI must be positive"));
        }
        if !self.slope.is_finite() || self.slope == 0.0 {
            return Err(QuiltError::config("calibration slope must be non-zero"));
        }
        if !self.pitch.is_finite() || !self.center.is_finite() {
            return Err(QuiltError::config("calibration pitch/center must be finite"));
        }
        Ok(())
    }

    fn pitch_per_screen(&self) -> f64 {
        let screen_inches = f64::from(self.screen_w) / self.dpi;
        self.pitch * screen_inches * (1.0 / self.slope).atan().cos()
    }

    fn tilt(&self) -> f64 {
        f64::from(self.screen_h) / (f64::from(self.screen_w) * self.slope)
    }

    /// View index shown at display pixel `(x, y)` for a quilt of `view_count` views.
    ///
    /// The lens phase runs opposite to quilt order: phase 0 sees the last view.
    pub fn view_at(&self, x: u32, y: u32, view_count: u32) -> u32 {
        let u = f64::from(x) / f64::from(self.screen_w);
        let v = f64::from(y) / f64::from(self.screen_h);
        let a = ((u + v * self.tilt()) * self.pitch_per_screen() - self.center + 0.5).rem_euclid(1.0);
        let last = view_count.saturating_sub(1);
        last - ((a * f64::from(view_count)).floor() as u32).min(last)
    }
}

/// Interlace a quilt frame into a `screen_w x screen_h` display frame.
pub fn interlace(quilt: &Frame, spec: &QuiltSpec, cal: &Calibration) -> QuiltResult<Frame> {
    spec.validate()?;
    cal.validate()?;
    if quilt.size() != (spec.total_width(), spec.total_height()) {
        return Err(QuiltError::invalid_frame(format!(
            "quilt is {}x{}, spec expects {}x{}",
            quilt.width(),
            quilt.height(),
            spec.total_width(),
            spec.total_height()
        )));
    }

    let (w, h) = (cal.screen_w, cal.screen_h);
    let mut out = Vec::with_capacity(rgb8_len(w, h));
    for y in 0..h {
        let ty = ((u64::from(y) * u64::from(spec.tile_height)) / u64::from(h)) as u32;
        for x in 0..w {
            let view = cal.view_at(x, y, spec.view_count);
            let (ox, oy) = tile_origin(spec, view);
            let tx = ((u64::from(x) * u64::from(spec.tile_width)) / u64::from(w)) as u32;
            out.extend_from_slice(&quilt.pixel_at(ox + tx, oy + ty)[..CHANNELS]);
        }
    }
    Ok(Frame::from_parts_unchecked(w, h, out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quilt::compose::compose_quilt;
    use crate::quilt::synth::ViewSet;

    const VISUAL: &str = r#"{
        "configVersion": "1.0",
        "pitch": {"value": 47.58},
        "slope": {"value": -5.43},
        "center": {"value": 0.12},
        "fringe": {"value": 0.0},
        "screenW": {"value": 64.0},
        "screenH": {"value": 32.0},
        "DPI": {"value": 324.0}
    }"#;

    #[test]
    fn parses_wrapped_and_plain_values() {
        let cal = Calibration::from_json(VISUAL).unwrap();
        assert_eq!((cal.screen_w, cal.screen_h), (64, 32));
        assert!((cal.pitch - 47.58).abs() < 1e-9);

        let plain = r#"{"pitch":50,"slope":-5,"center":0,"screenW":10,"screenH":10,"DPI":300}"#;
        let cal = Calibration::from_json(plain).unwrap();
        assert_eq!(cal.slope, -5.0);
    }

    #[test]
    fn rejects_zero_slope_and_missing_fields() {
        let bad = r#"{"pitch":50,"slope":0,"center":0,"screenW":10,"screenH":10,"DPI":300}"#;
        assert!(matches!(
            Calibration::from_json(bad),
            Err(QuiltError::ConfigInvalid(_))
        ));
        assert!(Calibration::from_json(r#"{"pitch":50}"#).is_err());
    }

    #[test]
    fn view_at_stays_in_range() {
        let cal = Calibration::from_json(VISUAL).unwrap();
        for y in 0..cal.screen_h {
            for x in 0..cal.screen_w {
                assert!(cal.view_at(x, y, 45) < 45);
            }
        }
    }

    /// Phase-to-tile mapping written against a top-down grid: phase slot `k` sits in row
    /// `k / cols` from the top, columns mirrored.
    fn tile_from_phase(cal: &Calibration, x: u32, y: u32, cols: u32, rows: u32) -> (u32, u32) {
        let (w, h) = (f64::from(cal.screen_w), f64::from(cal.screen_h));
        let pitch_calc = cal.pitch * (w / cal.dpi) * (1.0 / cal.slope).atan().cos();
        let tilt = h / (w * cal.slope);
        let a = ((f64::from(x) / w + f64::from(y) / h * tilt) * pitch_calc - cal.center + 0.5)
            .rem_euclid(1.0);
        let k = ((a * f64::from(cols * rows)).floor() as u32).min(cols * rows - 1);
        (cols - 1 - k % cols, k / cols)
    }

    #[test]
    fn lens_phase_maps_to_mirrored_top_down_tiles() {
        let cal = Calibration::from_json(VISUAL).unwrap();
        let spec = QuiltSpec::new(2, 2, 4, 4, 4);
        let colors = [[10, 0, 0], [20, 0, 0], [30, 0, 0], [40, 0, 0]];
        let views = ViewSet::new(
            colors
                .iter()
                .map(|c| Frame::solid(4, 4, *c).unwrap())
                .collect(),
        );
        let quilt = compose_quilt(&views, &spec).unwrap();
        let out = interlace(&quilt, &spec, &cal).unwrap();

        let mut seen = std::collections::HashSet::new();
        for y in 0..cal.screen_h {
            for x in 0..cal.screen_w {
                let (col, top_row) = tile_from_phase(&cal, x, y, 2, 2);
                let px = quilt.pixel_at(col * 4 + 1, top_row * 4 + 1);
                assert_eq!(out.pixel_at(x, y), px, "display pixel ({x},{y})");
                seen.insert(px);
            }
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn phase_zero_shows_the_last_view() {
        let cal = Calibration {
            screen_w: 8,
            screen_h: 8,
            pitch: 0.0,
            slope: 1.0,
            center: 0.5,
            dpi: 100.0,
        };
        assert_eq!(cal.view_at(0, 0, 45), 44);
        assert_eq!(cal.view_at(7, 7, 1), 0);
    }

    #[test]
    fn interlace_rejects_invalid_geometry() {
        let cal = Calibration::from_json(VISUAL).unwrap();
        let quilt = Frame::solid(4, 4, [0, 0, 0]).unwrap();
        assert!(matches!(
            interlace(&quilt, &QuiltSpec::new(1, 1, 2, 4, 4), &cal),
            Err(QuiltError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn interlaced_pixels_come_from_the_selected_view() {
        let spec = QuiltSpec::new(2, 2, 4, 4, 4);
        let colors = [[10, 0, 0], [20, 0, 0], [30, 0, 0], [40, 0, 0]];
        let views = ViewSet::new(
            colors
                .iter()
                .map(|c| Frame::solid(4, 4, *c).unwrap())
                .collect(),
        );
        let quilt = compose_quilt(&views, &spec).unwrap();
        let cal = Calibration::from_json(VISUAL).unwrap();
        let out = interlace(&quilt, &spec, &cal).unwrap();
        assert_eq!(out.size(), (64, 32));
        for (x, y) in [(0, 0), (13, 7), (63, 31), (31, 16)] {
            let v = cal.view_at(x, y, 4) as usize;
            assert_eq!(out.pixel_at(x, y), colors[v]);
        }
    }
}
