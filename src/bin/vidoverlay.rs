use std::{
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

use anyhow::Context as _;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use vidoverlay::pipeline::opts::SyntheticSink;
use vidoverlay::pipeline::preview::{render_preview, save_png};

#[derive(Parser, Debug)]
#[command(name = "vidoverlay", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Bake an overlay into a video and print the result as JSON.
    Compose(ComposeArgs),
    /// Print the selected video track of a container as JSON.
    Probe(ProbeArgs),
    /// Composite a single frame and write it as a PNG.
    Frame(FrameArgs),
}

#[derive(Parser, Debug)]
struct ComposeArgs {
    /// Source MP4 (plain path or file:// URI).
    #[arg(long = "in")]
    in_path: String,

    /// Overlay JSON file.
    #[arg(long)]
    overlay: PathBuf,

    /// Output directory (defaults to VIDOVERLAY_OUTPUT_DIR or the temp dir).
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Encoder for the synthetic fallback.
    #[arg(long, value_enum)]
    sink: Option<SinkChoice>,

    /// Font file for text overlays.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct ProbeArgs {
    /// Source MP4.
    #[arg(long = "in")]
    in_path: PathBuf,
}

#[derive(Parser, Debug)]
struct FrameArgs {
    /// Source MP4; omit to preview over the synthetic background.
    #[arg(long = "in")]
    in_path: Option<PathBuf>,

    /// Overlay JSON file.
    #[arg(long)]
    overlay: PathBuf,

    /// Frame index (0-based).
    #[arg(long, default_value_t = 0)]
    frame: u64,

    /// Output PNG path.
    #[arg(long)]
    out: PathBuf,

    /// Font file for text overlays.
    #[arg(long)]
    font: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum SinkChoice {
    Builtin,
    Ffmpeg,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Compose(args) => cmd_compose(args),
        Command::Probe(args) => cmd_probe(args),
        Command::Frame(args) => cmd_frame(args),
    }
}

fn read_overlay_json(path: &Path) -> anyhow::Result<serde_json::Value> {
    let f = File::open(path).with_context(|| format!("open overlay '{}'", path.display()))?;
    let v = serde_json::from_reader(BufReader::new(f)).with_context(|| "parse overlay JSON")?;
    Ok(v)
}

fn cmd_compose(args: ComposeArgs) -> anyhow::Result<()> {
    let mut opts = vidoverlay::ExportOpts::from_env()?;
    if let Some(dir) = args.out_dir {
        opts.output_dir = dir;
    }
    if let Some(font) = args.font {
        opts.font_path = Some(font);
    }
    if let Some(sink) = args.sink {
        opts.synthetic_sink = match sink {
            SinkChoice::Builtin => SyntheticSink::Builtin,
            SinkChoice::Ffmpeg => SyntheticSink::Ffmpeg,
        };
    }

    let request =
        vidoverlay::bridge::ComposeRequest::new(args.in_path, read_overlay_json(&args.overlay)?);
    let response = vidoverlay::bridge::compose(
        &request,
        &opts,
        &vidoverlay::OpenH264Factory,
        &vidoverlay::CancelToken::new(),
    );
    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.is_ok() {
        anyhow::bail!("compose failed");
    }
    Ok(())
}

fn cmd_probe(args: ProbeArgs) -> anyhow::Result<()> {
    let track = vidoverlay::validate_source(&args.in_path)?;
    println!("{}", serde_json::to_string_pretty(&track)?);
    Ok(())
}

fn cmd_frame(args: FrameArgs) -> anyhow::Result<()> {
    let mut opts = vidoverlay::ExportOpts::from_env()?;
    if let Some(font) = args.font {
        opts.font_path = Some(font);
    }
    let overlay = vidoverlay::OverlaySpec::from_value(read_overlay_json(&args.overlay)?)?;

    let frame = render_preview(
        args.in_path.as_deref(),
        &overlay,
        vidoverlay::FrameIndex(args.frame),
        &opts,
        &vidoverlay::OpenH264Factory,
    )?;
    save_png(&frame, &args.out)?;

    eprintln!("wrote {}", args.out.display());
    Ok(())
}
