//! View synthesis: one source frame in, `view_count` laterally shifted tiles out.
//!
//! The source is first resampled to the tile size, then each view is produced by a horizontal
//! reprojection. Views are indexed left-to-right camera positions; the center view has zero shift
//! and the outermost views are `max_disparity / 2` pixels away on either side. Columns exposed by
//! a shift are filled from the nearest valid column (edge extend).

use image::imageops::{self, FilterType};

use crate::foundation::core::{CHANNELS, Frame, Raster};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::quilt::spec::QuiltSpec;

/// Depth assumption used to scale the per-view shift.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DepthMode {
    /// Every pixel sits on one plane; the whole view shifts uniformly.
    #[default]
    Uniform,
    /// Pixel luma stands in for nearness (255 = full shift, 0 = none).
    Luminance,
}

/// View synthesis options.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SynthOpts {
    /// Disparity in tile pixels between the first and the last view.
    pub max_disparity: f32,
    /// Depth assumption.
    pub depth: DepthMode,
}

impl Default for SynthOpts {
    fn default() -> Self {
        Self {
            max_disparity: 16.0,
            depth: DepthMode::Uniform,
        }
    }
}

impl SynthOpts {
    /// Reject non-finite or negative disparity.
    pub fn validate(&self) -> QuiltResult<()> {
        if !self.max_disparity.is_finite() || self.max_disparity < 0.0 {
            return Err(QuiltError::config(format!(
                "maxDisparity must be a finite value >= 0, got {}",
                self.max_disparity
            )));
        }
        Ok(())
    }
}

/// Exactly `view_count` tiles derived from one source frame, in view order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewSet {
    views: Vec<Frame>,
}

impl ViewSet {
    /// Wrap pre-built views. No size checks are made here; the composer validates tiles.
    pub fn new(views: Vec<Frame>) -> Self {
        Self { views }
    }

    /// Number of views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Return `true` when there are no views.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    /// Borrow the views in order.
    pub fn views(&self) -> &[Frame] {
        &self.views
    }

    /// Borrow view `i`.
    pub fn get(&self, i: usize) -> Option<&Frame> {
        self.views.get(i)
    }
}

/// Horizontal shift of view `i` in pixels. Positive moves content to the right.
pub fn view_shift(i: u32, view_count: u32, max_disparity: f32) -> f32 {
    if view_count <= 1 {
        return 0.0;
    }
    let center = (view_count - 1) as f32 / 2.0;
    max_disparity * (center - i as f32) / (view_count - 1) as f32
}

/// Derive the view set for one source frame.
///
/// Pure function of its inputs: identical inputs produce byte-identical views.
pub fn synthesize_views(
    frame: &Frame,
    spec: &QuiltSpec,
    opts: &SynthOpts,
) -> QuiltResult<ViewSet> {
    spec.validate()?;
    if frame.width() == 0 || frame.height() == 0 {
        return Err(QuiltError::invalid_frame(format!(
            "cannot synthesize views from a {}x{} frame",
            frame.width(),
            frame.height()
        )));
    }

    let base = fit_to_tile(frame, spec.tile_width, spec.tile_height)?;
    let depth = match opts.depth {
        DepthMode::Uniform => None,
        DepthMode::Luminance => Some(luma_plane(&base)),
    };

    let views = (0..spec.view_count)
        .map(|i| {
            let shift = view_shift(i, spec.view_count, opts.max_disparity);
            shift_view(&base, shift, depth.as_deref())
        })
        .collect();
    Ok(ViewSet::new(views))
}

/// Resample `frame` to exactly `tw x th`. Frames already at tile size are cloned as-is.
fn fit_to_tile(frame: &Frame, tw: u32, th: u32) -> QuiltResult<Frame> {
    if frame.size() == (tw, th) {
        return Ok(frame.clone());
    }
    let src = frame.clone().into_image()?;
    let resized = imageops::resize(&src, tw, th, FilterType::Triangle);
    Frame::from_image(resized)
}

fn luma_plane(frame: &Frame) -> Vec<f32> {
    frame
        .as_bytes()
        .chunks_exact(CHANNELS)
        .map(|p| (0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32) / 255.0)
        .collect()
}

fn shift_view(base: &Frame, shift: f32, depth: Option<&[f32]>) -> Frame {
    let (w, h) = base.size();
    let max_x = w as i64 - 1;
    let mut out = Vec::with_capacity(base.as_bytes().len());

    for y in 0..h {
        let row = base.row(y);
        for x in 0..w {
            let s = match depth {
                None => shift,
                Some(d) => shift * d[(y as usize) * (w as usize) + x as usize],
            };
            let sx = (x as i64 - s.round() as i64).clamp(0, max_x) as usize;
            let i = sx * CHANNELS;
            out.extend_from_slice(&row[i..i + CHANNELS]);
        }
    }

    Frame::from_parts_unchecked(w, h, out)
}
