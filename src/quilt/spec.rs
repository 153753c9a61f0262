use std::path::{Path, PathBuf};

use crate::encode::codec::Codec;
use crate::foundation::error::{QuiltError, QuiltResult};

/// Quilt grid geometry.
///
/// Invariants (checked by [`QuiltSpec::validate`]): every dimension is positive,
/// `rows * cols >= view_count`, and the optional totals equal `cols * tile_width` /
/// `rows * tile_height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct QuiltSpec {
    /// Grid rows. Row 0 is the bottom row of the output image.
    pub rows: u32,
    /// Grid columns.
    pub cols: u32,
    /// Number of synthesized views.
    pub view_count: u32,
    /// Width of one view tile in pixels.
    pub tile_width: u32,
    /// Height of one view tile in pixels.
    pub tile_height: u32,
    /// Expected total width; derived when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_width: Option<u32>,
    /// Expected total height; derived when omitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_height: Option<u32>,
}

impl Default for QuiltSpec {
    fn default() -> Self {
        QuiltPreset::Landscape.spec()
    }
}

impl QuiltSpec {
    /// Grid geometry with derived totals.
    pub fn new(rows: u32, cols: u32, view_count: u32, tile_width: u32, tile_height: u32) -> Self {
        Self {
            rows,
            cols,
            view_count,
            tile_width,
            tile_height,
            total_width: None,
            total_height: None,
        }
    }

    /// Check the geometry invariants. Performs no I/O.
    pub fn validate(&self) -> QuiltResult<()> {
        if self.rows == 0 || self.cols == 0 {
            return Err(QuiltError::config(format!(
                "quilt grid must be non-empty, got {}x{}",
                self.cols, self.rows
            )));
        }
        if self.view_count == 0 {
            return Err(QuiltError::config("view count must be >= 1"));
        }
        if self.tile_width == 0 || self.tile_height == 0 {
            return Err(QuiltError::config(format!(
                "tile size must be non-zero, got {}x{}",
                self.tile_width, self.tile_height
            )));
        }
        if u64::from(self.rows) * u64::from(self.cols) < u64::from(self.view_count) {
            return Err(QuiltError::config(format!(
                "{} views do not fit a {}x{} grid",
                self.view_count, self.cols, self.rows
            )));
        }
        let w = u64::from(self.cols) * u64::from(self.tile_width);
        let h = u64::from(self.rows) * u64::from(self.tile_height);
        if w > u64::from(u32::MAX) || h > u64::from(u32::MAX) {
            return Err(QuiltError::config("quilt dimensions overflow u32"));
        }
        if let Some(tw) = self.total_width
            && u64::from(tw) != w
        {
            return Err(QuiltError::config(format!(
                "totalWidth {tw} != cols * tileWidth ({w})"
            )));
        }
        if let Some(th) = self.total_height
            && u64::from(th) != h
        {
            return Err(QuiltError::config(format!(
                "totalHeight {th} != rows * tileHeight ({h})"
            )));
        }
        Ok(())
    }

    /// `cols * tile_width`.
    pub fn total_width(&self) -> u32 {
        self.cols * self.tile_width
    }

    /// `rows * tile_height`.
    pub fn total_height(&self) -> u32 {
        self.rows * self.tile_height
    }

    /// Number of grid cells.
    pub fn cells(&self) -> u32 {
        self.rows * self.cols
    }

    /// Per-view aspect ratio (`tile_width / tile_height`).
    pub fn aspect(&self) -> f64 {
        f64::from(self.tile_width) / f64::from(self.tile_height)
    }

    /// Looking Glass filename tag, e.g. `_qs5x9a1.79`.
    ///
    /// Players detect quilt geometry from this tag, so it is part of the output name.
    pub fn filename_tag(&self) -> String {
        format!("_qs{}x{}a{:.2}", self.cols, self.rows, self.aspect())
    }
}

/// Geometry parsed from a `_qs{cols}x{rows}a{aspect}` filename tag.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuiltTag {
    /// Grid columns.
    pub cols: u32,
    /// Grid rows.
    pub rows: u32,
    /// Per-view aspect ratio.
    pub aspect: f64,
}

/// Find and parse the last `_qs{cols}x{rows}a{aspect}` tag in a file name.
pub fn parse_quilt_tag(name: &str) -> Option<QuiltTag> {
    let file = Path::new(name)
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(name);
    file.rmatch_indices("_qs")
        .find_map(|(i, _)| parse_tag_body(&file[i + 3..]))
}

fn parse_tag_body(s: &str) -> Option<QuiltTag> {
    let (cols, rest) = take_digits(s)?;
    let rest = rest.strip_prefix('x')?;
    let (rows, rest) = take_digits(rest)?;
    let rest = rest.strip_prefix('a')?;
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let aspect = rest[..end].trim_end_matches('.').parse::<f64>().ok()?;
    if cols == 0 || rows == 0 || aspect.is_nan() || aspect <= 0.0 {
        return None;
    }
    Some(QuiltTag { cols, rows, aspect })
}

fn take_digits(s: &str) -> Option<(u32, &str)> {
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((s[..end].parse().ok()?, &s[end..]))
}

/// Output path next to `input`: `<stem><tag>.<ext>` with the codec's container extension.
pub fn default_output_path(input: &Path, spec: &QuiltSpec, codec: Codec) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_owned());
    let name = format!("{stem}{}.{}", spec.filename_tag(), codec.container_ext());
    match input.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Common Looking Glass quilt layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuiltPreset {
    /// 8x6 grid, 48 portrait views (3360x3360).
    Portrait,
    /// 11x6 grid, 66 views (4092x4092).
    Go,
    /// 5x9 grid, 45 landscape views (4080x4104).
    Landscape,
}

impl QuiltPreset {
    /// The preset's grid geometry.
    pub fn spec(self) -> QuiltSpec {
        match self {
            Self::Portrait => QuiltSpec::new(6, 8, 48, 420, 560),
            Self::Go => QuiltSpec::new(6, 11, 66, 372, 682),
            Self::Landscape => QuiltSpec::new(9, 5, 45, 816, 456),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid_and_even() {
        for p in [QuiltPreset::Portrait, QuiltPreset::Go, QuiltPreset::Landscape] {
            let s = p.spec();
            s.validate().unwrap();
            assert_eq!(s.cells(), s.view_count);
            assert_eq!(s.total_width() % 2, 0);
            assert_eq!(s.total_height() % 2, 0);
        }
        assert_eq!(QuiltPreset::Portrait.spec().total_width(), 3360);
        assert_eq!(QuiltPreset::Go.spec().total_height(), 4092);
    }

    #[test]
    fn validate_rejects_too_many_views() {
        let s = QuiltSpec::new(2, 2, 5, 8, 8);
        assert!(matches!(s.validate(), Err(QuiltError::ConfigInvalid(_))));
    }

    #[test]
    fn validate_rejects_zero_dimensions() {
        assert!(QuiltSpec::new(0, 2, 1, 8, 8).validate().is_err());
        assert!(QuiltSpec::new(2, 2, 0, 8, 8).validate().is_err());
        assert!(QuiltSpec::new(2, 2, 4, 0, 8).validate().is_err());
    }

    #[test]
    fn validate_checks_explicit_totals() {
        let mut s = QuiltSpec::new(2, 3, 6, 10, 20);
        s.total_width = Some(30);
        s.total_height = Some(40);
        s.validate().unwrap();
        s.total_width = Some(31);
        assert!(s.validate().is_err());
    }

    #[test]
    fn filename_tag_round_trips_through_parser() {
        let s = QuiltSpec::new(9, 5, 45, 816, 456);
        assert_eq!(s.filename_tag(), "_qs5x9a1.79");
        let tag = parse_quilt_tag(&format!("clip{}.mp4", s.filename_tag())).unwrap();
        assert_eq!((tag.cols, tag.rows), (5, 9));
        assert!((tag.aspect - 1.79).abs() < 1e-9);
    }

    #[test]
    fn parse_quilt_tag_ignores_garbage() {
        assert_eq!(parse_quilt_tag("holiday.mp4"), None);
        assert_eq!(parse_quilt_tag("x_qsAx9a1.0.mp4"), None);
        assert_eq!(parse_quilt_tag("x_qs5x9.mp4"), None);
        let tag = parse_quilt_tag("NameOfVideo_qs8x6a0.75").unwrap();
        assert_eq!((tag.cols, tag.rows), (8, 6));
    }

    #[test]
    fn default_output_path_uses_container_extension() {
        let s = QuiltSpec::new(2, 2, 4, 32, 16);
        let p = default_output_path(Path::new("/videos/beach.mkv"), &s, Codec::ProRes422);
        assert_eq!(p, PathBuf::from("/videos/beach_qs2x2a2.00.mov"));
        let p = default_output_path(Path::new("beach.mkv"), &s, Codec::H264);
        assert_eq!(p, PathBuf::from("beach_qs2x2a2.00.mp4"));
    }

    #[test]
    fn spec_deserializes_camel_case_with_defaults() {
        let s: QuiltSpec = serde_json::from_str(
            r#"{"rows":2,"cols":2,"viewCount":4,"tileWidth":32,"tileHeight":16}"#,
        )
        .unwrap();
        assert_eq!(s, QuiltSpec::new(2, 2, 4, 32, 16));
        let d: QuiltSpec = serde_json::from_str("{}").unwrap();
        assert_eq!(d, QuiltSpec::default());
    }
}
