use std::path::{Path, PathBuf};

use anyhow::Context as _;
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use quiltgen::{
    Codec, DepthMode, FfmpegSourceOpts, FrameSource, Fps, QuiltPreset, Raster,
    RunConfig, RunOutcome,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "quiltgen", version, about = "Convert 2D video into Looking Glass quilt video")]
struct Cli {
    /// Raise log verbosity (`-v` debug, `-vv` trace). `RUST_LOG` takes precedence.
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// `ffmpeg` executable.
    #[arg(long, global = true, default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// `ffprobe` executable.
    #[arg(long, global = true, default_value = "ffprobe")]
    ffprobe: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert a video into a quilt video (requires `ffmpeg` and `ffprobe` on PATH).
    Convert(ConvertArgs),
    /// Write a single quilt frame as a PNG.
    Preview(PreviewArgs),
    /// Print source metadata and the suggested output name.
    Info(InfoArgs),
}

#[derive(clap::Args, Debug)]
struct QuiltArgs {
    /// JSON run configuration; flags override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Quilt preset.
    #[arg(long, value_enum)]
    preset: Option<PresetArg>,

    /// Grid rows.
    #[arg(long)]
    rows: Option<u32>,

    /// Grid columns.
    #[arg(long)]
    cols: Option<u32>,

    /// Number of views.
    #[arg(long)]
    views: Option<u32>,

    /// Tile width in pixels.
    #[arg(long)]
    tile_width: Option<u32>,

    /// Tile height in pixels.
    #[arg(long)]
    tile_height: Option<u32>,

    /// Disparity in tile pixels between the outermost views.
    #[arg(long)]
    max_disparity: Option<f32>,

    /// Depth assumption for the view shift.
    #[arg(long, value_enum)]
    depth: Option<DepthArg>,

    /// Display calibration (`visual.json`); output is interlaced for that display.
    #[arg(long)]
    calibration: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ConvertArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output video; derived from the input name and quilt tag when omitted.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    quilt: QuiltArgs,

    /// Usable codecs, best first (e.g. `prores422,h265,h264`).
    #[arg(long, value_delimiter = ',')]
    codecs: Vec<Codec>,

    /// Requested codec; lower codecs in the fallback chain are used when unavailable.
    #[arg(long)]
    codec: Option<Codec>,

    /// Quality 1-100.
    #[arg(long)]
    quality: Option<u8>,

    /// Output frame rate (`30`, `30000/1001`, `29.97`); defaults to the source rate.
    #[arg(long, value_parser = Fps::parse)]
    fps: Option<Fps>,

    /// Keep 4:4:4 chroma for H.264/H.265.
    #[arg(long)]
    full_chroma: bool,

    /// Override rayon worker threads.
    #[arg(long)]
    threads: Option<usize>,

    /// Process frames on the calling thread only.
    #[arg(long)]
    sequential: bool,

    /// Keep a finalized partial output if the run is cancelled.
    #[arg(long)]
    keep_partial: bool,
}

#[derive(Parser, Debug)]
struct PreviewArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Source frame index (0-based).
    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    #[command(flatten)]
    quilt: QuiltArgs,
}

#[derive(Parser, Debug)]
struct InfoArgs {
    /// Input video.
    #[arg(long = "in")]
    in_path: PathBuf,

    #[command(flatten)]
    quilt: QuiltArgs,

    /// Usable codecs, best first.
    #[arg(long, value_delimiter = ',')]
    codecs: Vec<Codec>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum PresetArg {
    Portrait,
    Go,
    Landscape,
}

impl From<PresetArg> for QuiltPreset {
    fn from(p: PresetArg) -> Self {
        match p {
            PresetArg::Portrait => Self::Portrait,
            PresetArg::Go => Self::Go,
            PresetArg::Landscape => Self::Landscape,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum DepthArg {
    Uniform,
    Luminance,
}

impl From<DepthArg> for DepthMode {
    fn from(d: DepthArg) -> Self {
        match d {
            DepthArg::Uniform => Self::Uniform,
            DepthArg::Luminance => Self::Luminance,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    initialise_tracing(cli.verbose);

    let tools = FfmpegSourceOpts {
        ffmpeg_bin: cli.ffmpeg,
        ffprobe_bin: cli.ffprobe,
    };
    match cli.cmd {
        Command::Convert(args) => cmd_convert(args, tools),
        Command::Preview(args) => cmd_preview(args, tools),
        Command::Info(args) => cmd_info(args, tools),
    }
}

fn initialise_tracing(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Load `--config` (if any) and apply the quilt flags on top.
fn load_config(args: &QuiltArgs) -> anyhow::Result<RunConfig> {
    let mut cfg = match &args.config {
        Some(path) => RunConfig::from_path(path)
            .with_context(|| format!("load config '{}'", path.display()))?,
        None => RunConfig::default(),
    };

    if let Some(preset) = args.preset {
        cfg.quilt = QuiltPreset::from(preset).spec();
    }
    let q = &mut cfg.quilt;
    let mut geometry_changed = false;
    for (flag, field) in [
        (args.rows, &mut q.rows),
        (args.cols, &mut q.cols),
        (args.views, &mut q.view_count),
        (args.tile_width, &mut q.tile_width),
        (args.tile_height, &mut q.tile_height),
    ] {
        if let Some(v) = flag {
            *field = v;
            geometry_changed = true;
        }
    }
    if geometry_changed {
        q.total_width = None;
        q.total_height = None;
    }

    if let Some(d) = args.max_disparity {
        cfg.synth.max_disparity = d;
    }
    if let Some(d) = args.depth {
        cfg.synth.depth = d.into();
    }
    if let Some(path) = &args.calibration {
        cfg.calibration = Some(path.clone());
    }
    Ok(cfg)
}

fn cmd_convert(args: ConvertArgs, tools: FfmpegSourceOpts) -> anyhow::Result<()> {
    let mut cfg = load_config(&args.quilt)?;
    if !args.codecs.is_empty() {
        cfg.codecs = Some(args.codecs.clone());
    }
    if let Some(codec) = args.codec {
        cfg.encode.codec = codec;
    }
    if let Some(q) = args.quality {
        cfg.encode.quality = q;
    }
    if args.fps.is_some() {
        cfg.encode.frame_rate = args.fps;
    }
    cfg.encode.full_chroma |= args.full_chroma;
    if args.threads.is_some() {
        cfg.pipeline.threads = args.threads;
    }
    if args.sequential {
        cfg.pipeline.parallel = false;
    }
    cfg.pipeline.keep_partial |= args.keep_partial;

    if let Some(out) = args.out {
        cfg.encode.output_path = out;
    } else if cfg.encode.output_path.as_os_str().is_empty() {
        // Name the file after the codec that will actually be used.
        let codec = quiltgen::negotiate(&cfg.encode, &cfg.available_codecs())?.codec;
        cfg.encode.output_path = quiltgen::default_output_path(&args.in_path, &cfg.quilt, codec);
    }

    let pipeline = cfg.into_pipeline()?;
    let progress = pipeline.progress();
    let updates = progress.subscribe();
    let printer = std::thread::spawn(move || {
        for snap in updates {
            if snap.state.is_terminal() {
                break;
            }
            if snap.frames_processed.is_multiple_of(10) {
                match (snap.total_frames, snap.fraction()) {
                    (Some(total), Some(f)) => eprintln!(
                        "frame {}/{} ({:.0}%)",
                        snap.frames_processed,
                        total,
                        f * 100.0
                    ),
                    _ => eprintln!("frame {}", snap.frames_processed),
                }
            }
        }
    });

    let res = pipeline.convert_file(&args.in_path, tools);
    // The run always ends in a terminal state, which stops the printer.
    debug_assert!(progress.state().is_terminal());
    let _ = printer.join();

    match res.with_context(|| format!("convert '{}'", args.in_path.display()))? {
        RunOutcome::Completed(stats) => {
            eprintln!(
                "wrote {} ({} frames, {})",
                stats.output_path.display(),
                stats.frames_encoded,
                stats.codec
            );
        }
        RunOutcome::Cancelled => eprintln!("cancelled"),
    }
    Ok(())
}

fn cmd_preview(args: PreviewArgs, tools: FfmpegSourceOpts) -> anyhow::Result<()> {
    let cfg = load_config(&args.quilt)?;
    cfg.quilt.validate()?;
    cfg.synth.validate()?;
    let calibration = cfg.load_calibration()?;

    let mut source = quiltgen::FfmpegSource::open(&args.in_path, &tools)
        .with_context(|| format!("open '{}'", args.in_path.display()))?;
    let frame = loop {
        match source.next_frame()? {
            Some(sf) if sf.index.0 == args.frame => break sf.frame,
            Some(_) => {}
            None => anyhow::bail!(
                "'{}' has no frame {}",
                args.in_path.display(),
                args.frame
            ),
        }
    };
    drop(source);

    let out =
        quiltgen::build_output_frame(&frame, &cfg.quilt, &cfg.synth, calibration.as_ref())?;
    write_png(&args.out, out)?;
    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn write_png(path: &Path, frame: quiltgen::Frame) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    let (w, h) = (frame.width(), frame.height());
    image::save_buffer_with_format(
        path,
        frame.as_bytes(),
        w,
        h,
        image::ColorType::Rgb8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", path.display()))
}

fn cmd_info(args: InfoArgs, tools: FfmpegSourceOpts) -> anyhow::Result<()> {
    let cfg = load_config(&args.quilt)?;
    let info = quiltgen::probe_video(&args.in_path, &tools.ffprobe_bin)
        .with_context(|| format!("probe '{}'", args.in_path.display()))?;
    let available = if args.codecs.is_empty() {
        cfg.available_codecs()
    } else {
        args.codecs
    };
    let codec = quiltgen::negotiate(&cfg.encode, &available)?.codec;

    println!("source:     {}", args.in_path.display());
    println!("size:       {}x{}", info.width, info.height);
    println!("fps:        {} ({:.3})", info.fps, info.fps.as_f64());
    match info.frame_count {
        Some(n) => println!("frames:     {n}"),
        None => println!("frames:     unknown"),
    }
    println!(
        "quilt:      {}x{} grid, {} views, {}x{} px",
        cfg.quilt.cols,
        cfg.quilt.rows,
        cfg.quilt.view_count,
        cfg.quilt.total_width(),
        cfg.quilt.total_height()
    );
    println!("codec:      {codec}");
    println!(
        "output:     {}",
        quiltgen::default_output_path(&args.in_path, &cfg.quilt, codec).display()
    );
    Ok(())
}
