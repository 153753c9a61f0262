use crate::foundation::core::{CHANNELS, Frame, rgb8_len};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::quilt::spec::QuiltSpec;
use crate::quilt::synth::ViewSet;

/// Top-left pixel of grid cell `i` in the output image.
///
/// Cells are filled row-major with row 0 at the *bottom* of the image (Looking Glass quilt
/// convention).
pub fn tile_origin(spec: &QuiltSpec, i: u32) -> (u32, u32) {
    let row = i / spec.cols;
    let col = i % spec.cols;
    let x = col * spec.tile_width;
    let y = (spec.rows - 1 - row) * spec.tile_height;
    (x, y)
}

/// Arrange a view set into one quilt frame.
///
/// Cells beyond the last view repeat the last view so the grid never shows empty tiles.
pub fn compose_quilt(views: &ViewSet, spec: &QuiltSpec) -> QuiltResult<Frame> {
    spec.validate()?;
    if views.is_empty() || views.len() != spec.view_count as usize {
        return Err(QuiltError::invalid_frame(format!(
            "view set has {} views, quilt expects {}",
            views.len(),
            spec.view_count
        )));
    }
    let expected = (spec.tile_width, spec.tile_height);
    for (i, v) in views.views().iter().enumerate() {
        if v.size() != expected {
            return Err(QuiltError::TileSizeMismatch {
                view: i,
                expected,
                got: v.size(),
            });
        }
    }

    let (qw, qh) = (spec.total_width(), spec.total_height());
    let mut out = vec![0u8; rgb8_len(qw, qh)];
    let out_stride = qw as usize * CHANNELS;
    let tile_stride = spec.tile_width as usize * CHANNELS;
    let last = views.len() - 1;

    for cell in 0..spec.cells() {
        let view = &views.views()[(cell as usize).min(last)];
        let (x0, y0) = tile_origin(spec, cell);
        for ty in 0..spec.tile_height {
            let dst = (y0 + ty) as usize * out_stride + x0 as usize * CHANNELS;
            out[dst..dst + tile_stride].copy_from_slice(view.row(ty));
        }
    }

    Ok(Frame::from_parts_unchecked(qw, qh, out))
}
