use crate::foundation::error::{QuiltError, QuiltResult};

/// Bytes per pixel of every [`Frame`] (packed RGB8).
pub const CHANNELS: usize = 3;

/// Absolute 0-based frame index in source presentation order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> QuiltResult<Self> {
        if den == 0 {
            return Err(QuiltError::config("fps denominator must be > 0"));
        }
        if num == 0 {
            return Err(QuiltError::config("fps numerator must be > 0"));
        }
        Ok(Self { num, den })
    }

    /// Parse `"30"`, `"30000/1001"` or `"29.97"`.
    ///
    /// Decimal values are stored with a `1000` denominator.
    pub fn parse(s: &str) -> QuiltResult<Self> {
        let s = s.trim();
        if let Some((n, d)) = s.split_once('/') {
            let num = n
                .trim()
                .parse::<u32>()
                .map_err(|_| QuiltError::config(format!("invalid fps numerator in '{s}'")))?;
            let den = d
                .trim()
                .parse::<u32>()
                .map_err(|_| QuiltError::config(format!("invalid fps denominator in '{s}'")))?;
            return Self::new(num, den);
        }
        if let Ok(n) = s.parse::<u32>() {
            return Self::new(n, 1);
        }
        let f = s
            .parse::<f64>()
            .map_err(|_| QuiltError::config(format!("invalid fps '{s}'")))?;
        if !f.is_finite() || f <= 0.0 {
            return Err(QuiltError::config(format!("fps must be positive, got '{s}'")));
        }
        Self::new((f * 1000.0).round() as u32, 1000)
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }
}

impl std::fmt::Display for Fps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Read-only pixel access shared by every frame-like value.
pub trait Raster {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// RGB value at `(x, y)`; callers stay within bounds.
    fn pixel_at(&self, x: u32, y: u32) -> [u8; 3];
}

/// An RGB8 image with a tightly packed, row-major owned buffer.
///
/// Frames are never mutated after construction; stages hand them on by value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    /// Wrap an existing RGB8 buffer.
    pub fn from_rgb8(width: u32, height: u32, data: Vec<u8>) -> QuiltResult<Self> {
        if width == 0 || height == 0 {
            return Err(QuiltError::invalid_frame(format!(
                "frame dimensions must be non-zero, got {width}x{height}"
            )));
        }
        let expected = rgb8_len(width, height);
        if data.len() != expected {
            return Err(QuiltError::invalid_frame(format!(
                "frame buffer is {} bytes, expected {expected} for {width}x{height} rgb8",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with one color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> QuiltResult<Self> {
        let data = rgb.repeat(width as usize * height as usize);
        Self::from_rgb8(width, height, data)
    }

    /// Construct without validation. `data.len()` must equal `width * height * 3`.
    pub(crate) fn from_parts_unchecked(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), rgb8_len(width, height));
        Self {
            width,
            height,
            data,
        }
    }

    /// `(width, height)`.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Borrow the raw RGB8 bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Borrow one row of pixels.
    pub fn row(&self, y: u32) -> &[u8] {
        let stride = self.width as usize * CHANNELS;
        let start = y as usize * stride;
        &self.data[start..start + stride]
    }

    /// Consume the frame, returning its buffer.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Convert into an `image` buffer (no copy).
    pub fn into_image(self) -> QuiltResult<image::RgbImage> {
        let (w, h, len) = (self.width, self.height, self.data.len());
        image::RgbImage::from_raw(w, h, self.data).ok_or_else(|| {
            QuiltError::invalid_frame(format!("{len}-byte buffer does not hold a {w}x{h} image"))
        })
    }

    /// Build from an `image` buffer (no copy).
    pub fn from_image(img: image::RgbImage) -> QuiltResult<Self> {
        let (w, h) = img.dimensions();
        Self::from_rgb8(w, h, img.into_raw())
    }
}

impl Raster for Frame {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixel_at(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }
}

/// Byte length of a packed RGB8 image.
pub fn rgb8_len(width: u32, height: u32) -> usize {
    width as usize * height as usize * CHANNELS
}
