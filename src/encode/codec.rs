use std::path::PathBuf;

use crate::foundation::core::Fps;
use crate::foundation::error::{QuiltError, QuiltResult};

/// Output codecs, declared in decreasing output-quality preference.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    /// Apple ProRes 422 (`prores_ks`, 10-bit 4:2:2, `.mov`).
    #[serde(rename = "prores422")]
    ProRes422,
    /// H.265/HEVC (`libx265`).
    H265,
    /// H.264/AVC (`libx264`).
    H264,
}

/// Fixed fallback chain, best first.
pub const PREFERENCE_ORDER: [Codec; 3] = [Codec::ProRes422, Codec::H265, Codec::H264];

impl Codec {
    /// Stable identifier used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProRes422 => "prores422",
            Self::H265 => "h265",
            Self::H264 => "h264",
        }
    }

    /// `ffmpeg` encoder name.
    pub fn ffmpeg_encoder(self) -> &'static str {
        match self {
            Self::ProRes422 => "prores_ks",
            Self::H265 => "libx265",
            Self::H264 => "libx264",
        }
    }

    /// Container file extension.
    pub fn container_ext(self) -> &'static str {
        match self {
            Self::ProRes422 => "mov",
            Self::H265 | Self::H264 => "mp4",
        }
    }

    /// Output pixel format.
    pub fn pixel_format(self, full_chroma: bool) -> &'static str {
        match (self, full_chroma) {
            (Self::ProRes422, _) => "yuv422p10le",
            (_, true) => "yuv444p",
            (_, false) => "yuv420p",
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Codec {
    type Err = QuiltError;

    fn from_str(s: &str) -> QuiltResult<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prores422" | "prores" => Ok(Self::ProRes422),
            "h265" | "hevc" => Ok(Self::H265),
            "h264" | "avc" => Ok(Self::H264),
            other => Err(QuiltError::config(format!("unknown codec '{other}'"))),
        }
    }
}

/// Parse a comma-separated codec list such as `"prores422,h265,h264"`.
pub fn parse_codec_list(s: &str) -> QuiltResult<Vec<Codec>> {
    s.split(',')
        .filter(|p| !p.trim().is_empty())
        .map(str::parse)
        .collect()
}

/// Encode job description.
///
/// `codec` is the highest acceptable codec; [`negotiate`] may degrade it along
/// [`PREFERENCE_ORDER`].
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EncodeJob {
    /// Requested codec.
    pub codec: Codec,
    /// Quality in `1..=100`; higher is better.
    pub quality: u8,
    /// Output frame rate; the source rate is used when unset.
    pub frame_rate: Option<Fps>,
    /// Output file path.
    pub output_path: PathBuf,
    /// Keep full chroma resolution (4:4:4) for H.264/H.265.
    pub full_chroma: bool,
}

impl Default for EncodeJob {
    fn default() -> Self {
        Self {
            codec: Codec::ProRes422,
            quality: 65,
            frame_rate: None,
            output_path: PathBuf::new(),
            full_chroma: false,
        }
    }
}

impl EncodeJob {
    /// Check the job's own options. Performs no I/O.
    pub fn validate(&self) -> QuiltResult<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(QuiltError::config(format!(
                "quality must be in 1..=100, got {}",
                self.quality
            )));
        }
        if let Some(fps) = self.frame_rate
            && (fps.num == 0 || fps.den == 0)
        {
            return Err(QuiltError::config("frame rate must be non-zero"));
        }
        if self.output_path.as_os_str().is_empty() {
            return Err(QuiltError::config("output path must be set"));
        }
        Ok(())
    }

    /// Check that `width x height` frames can be encoded with this job's codec.
    pub fn validate_dimensions(&self, width: u32, height: u32) -> QuiltResult<()> {
        if width == 0 || height == 0 {
            return Err(QuiltError::config("encode width/height must be non-zero"));
        }
        let pix_fmt = self.codec.pixel_format(self.full_chroma);
        if pix_fmt != "yuv444p" && !width.is_multiple_of(2) {
            return Err(QuiltError::config(format!(
                "width must be even for {pix_fmt} output, got {width}"
            )));
        }
        if pix_fmt == "yuv420p" && !height.is_multiple_of(2) {
            return Err(QuiltError::config(format!(
                "height must be even for {pix_fmt} output, got {height}"
            )));
        }
        Ok(())
    }

    /// Constant rate factor for the x264/x265 encoders.
    pub fn crf(&self) -> u8 {
        let q = f64::from(self.quality.clamp(1, 100));
        (51.0 * (100.0 - q) / 100.0).round() as u8
    }

    /// `ffmpeg` output arguments for the codec (everything between `-i pipe:0` and the path).
    pub fn ffmpeg_output_args(&self) -> Vec<String> {
        let mut args = vec!["-an".to_owned(), "-c:v".to_owned()];
        args.push(self.codec.ffmpeg_encoder().to_owned());
        match self.codec {
            Codec::H264 | Codec::H265 => {
                args.extend(["-preset".to_owned(), "medium".to_owned()]);
                args.extend(["-crf".to_owned(), self.crf().to_string()]);
                if self.codec == Codec::H264 && self.full_chroma {
                    args.extend(["-profile:v".to_owned(), "high444".to_owned()]);
                }
                if self.codec == Codec::H265 {
                    args.extend(["-tag:v".to_owned(), "hvc1".to_owned()]);
                }
            }
            Codec::ProRes422 => {
                let profile = if self.quality >= 90 { "3" } else { "2" };
                args.extend(["-profile:v".to_owned(), profile.to_owned()]);
            }
        }
        args.extend([
            "-pix_fmt".to_owned(),
            self.codec.pixel_format(self.full_chroma).to_owned(),
        ]);
        if self.codec.container_ext() == "mp4" {
            args.extend(["-movflags".to_owned(), "+faststart".to_owned()]);
        }
        args
    }
}

/// Pick the codec for `job`.
///
/// Walks [`PREFERENCE_ORDER`] from the requested codec downward and returns a copy of the job
/// carrying the first codec present in `available`. `available` comes from the setup layer; no
/// probing happens here.
#[tracing::instrument(skip(job), fields(requested = %job.codec))]
pub fn negotiate(job: &EncodeJob, available: &[Codec]) -> QuiltResult<EncodeJob> {
    let start = PREFERENCE_ORDER
        .iter()
        .position(|c| *c == job.codec)
        .unwrap_or(0);
    let chain = &PREFERENCE_ORDER[start..];

    for &codec in chain {
        if available.contains(&codec) {
            if codec != job.codec {
                tracing::warn!(requested = %job.codec, selected = %codec, "codec unavailable, falling back");
            } else {
                tracing::debug!(%codec, "requested codec available");
            }
            return Ok(EncodeJob {
                codec,
                ..job.clone()
            });
        }
        tracing::debug!(%codec, "codec not available");
    }

    Err(QuiltError::EncoderUnavailable {
        tried: chain.to_vec(),
    })
}
