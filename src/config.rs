//! JSON run configuration.
//!
//! Every section and field is optional; omitted values take the library defaults. Example:
//!
//! ```json
//! {
//!   "quilt": { "rows": 6, "cols": 8, "viewCount": 48, "tileWidth": 420, "tileHeight": 560 },
//!   "synth": { "maxDisparity": 24.0, "depth": "luminance" },
//!   "encode": { "codec": "h265", "quality": 80, "outputPath": "out_qs8x6a0.75.mp4" },
//!   "codecs": ["h265", "h264"],
//!   "pipeline": { "threads": 4 },
//!   "calibration": "visual.json"
//! }
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::encode::codec::{Codec, EncodeJob, PREFERENCE_ORDER};
use crate::foundation::error::{QuiltError, QuiltResult};
use crate::quilt::lenticular::Calibration;
use crate::quilt::spec::QuiltSpec;
use crate::quilt::synth::SynthOpts;
use crate::session::pipeline::{PipelineOpts, QuiltPipeline};

/// Top-level run configuration.
#[derive(Clone, Debug, Default, serde::Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct RunConfig {
    /// Quilt geometry.
    pub quilt: QuiltSpec,
    /// View synthesis options.
    pub synth: SynthOpts,
    /// Requested encode settings.
    pub encode: EncodeJob,
    /// Codecs usable in this environment, best first. All codecs when omitted.
    pub codecs: Option<Vec<Codec>>,
    /// Scheduling options.
    pub pipeline: PipelineOpts,
    /// Path to a `visual.json` display calibration; enables interlacing.
    pub calibration: Option<PathBuf>,
}

impl RunConfig {
    /// Parse a configuration from a JSON reader.
    pub fn from_reader<R: std::io::Read>(r: R) -> QuiltResult<Self> {
        serde_json::from_reader(r)
            .map_err(|e| QuiltError::config(format!("parse run config JSON: {e}")))
    }

    /// Parse a configuration from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> QuiltResult<Self> {
        let path = path.as_ref();
        let f = File::open(path).map_err(|e| {
            QuiltError::config(format!("open run config '{}': {e}", path.display()))
        })?;
        Self::from_reader(BufReader::new(f))
    }

    /// Codec availability list, defaulting to every codec.
    pub fn available_codecs(&self) -> Vec<Codec> {
        self.codecs
            .clone()
            .unwrap_or_else(|| PREFERENCE_ORDER.to_vec())
    }

    /// Load the calibration file, if one is configured.
    pub fn load_calibration(&self) -> QuiltResult<Option<Calibration>> {
        self.calibration
            .as_deref()
            .map(Calibration::load)
            .transpose()
    }

    /// Build a pipeline from this configuration, loading the calibration file if set.
    pub fn into_pipeline(self) -> QuiltResult<QuiltPipeline> {
        let calibration = self.load_calibration()?;
        let available = self.available_codecs();
        let opts = PipelineOpts {
            calibration: calibration.or(self.pipeline.calibration),
            ..self.pipeline
        };
        Ok(
            QuiltPipeline::new(self.quilt, self.synth, self.encode, opts)
                .with_available_codecs(available),
        )
    }
}
