//! tensor-stream: decode a stream once, serve post-processed frames to several readers

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use tensor_stream::capture::{DecoderFactory, RawFileFactory, SyntheticFactory};
use tensor_stream::process::{ColorOptions, ResizeOptions};
use tensor_stream::{telemetry, Config, Error, FourCC, FrameParameters, LogLevel, Planes, ResizeType, TensorStream};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve resized, color-converted frames of one decoded stream to many consumers")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Raw NV12 file or synthetic://WIDTHxHEIGHT@FPS (overrides stream.url)
    #[arg(short, long)]
    input: Option<String>,

    /// Number of concurrent consumers
    #[arg(short = 'n', long, default_value_t = 1)]
    consumers: usize,

    /// Frames each consumer reads before exiting; runs until end of stream by default
    #[arg(short, long)]
    frames: Option<u64>,

    /// Frames behind the newest one, in [-10, 0]
    #[arg(short, long, default_value_t = 0, allow_hyphen_values = true)]
    delay: i32,

    /// Output width, 0 keeps the source size
    #[arg(long, default_value_t = 0)]
    width: u32,

    /// Output height, 0 keeps the source size
    #[arg(long, default_value_t = 0)]
    height: u32,

    #[arg(long, value_enum, default_value_t = Resize::Nearest)]
    resize: Resize,

    #[arg(long, value_enum, default_value_t = Format::Rgb24)]
    pixel_format: Format,

    #[arg(long, value_enum, default_value_t = Layout::Merged)]
    planes: Layout,

    /// Output f32 samples in [0, 1]
    #[arg(long)]
    normalize: bool,

    /// Dump every frame read into this directory (overrides dump.dir)
    #[arg(long)]
    dump: Option<PathBuf>,

    /// -v info, -vv debug, -vvv trace
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Resize {
    Nearest,
    Bilinear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Y800,
    Rgb24,
    Bgr24,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Layout {
    Planar,
    Merged,
}

impl Cli {
    fn frame_parameters(&self) -> FrameParameters {
        FrameParameters::new(
            ResizeOptions {
                width: self.width,
                height: self.height,
                resize_type: match self.resize {
                    Resize::Nearest => ResizeType::Nearest,
                    Resize::Bilinear => ResizeType::Bilinear,
                },
            },
            ColorOptions {
                normalization: self.normalize,
                planes: match self.planes {
                    Layout::Planar => Planes::Planar,
                    Layout::Merged => Planes::Merged,
                },
                format: match self.pixel_format {
                    Format::Y800 => FourCC::Y800,
                    Format::Rgb24 => FourCC::Rgb24,
                    Format::Bgr24 => FourCC::Bgr24,
                },
            },
        )
    }
}

/// Reads until `frames` are served or the stream stops
fn consume(
    stream: &TensorStream,
    name: &str,
    delay: i32,
    params: &FrameParameters,
    frames: Option<u64>,
    dump: bool,
) -> tensor_stream::Result<u64> {
    let mut served = 0;
    while frames.map_or(true, |frames| served < frames) {
        let out = match stream.read(name, delay, params, true) {
            Ok(out) => out,
            Err(Error::Stopped) => break,
            Err(Error::Timeout { waited, .. }) => {
                warn!(consumer = name, ?waited, "No fresh frame");
                continue;
            }
            Err(e) => return Err(e),
        };
        served += 1;
        debug!(consumer = name, index = ?out.index, shape = ?out.tensor.shape(), "Read frame");
        if dump {
            stream.dump(&out.tensor, name, params)?;
        }
    }
    Ok(served)
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(input) = &cli.input {
        config.stream.url = input.clone();
    }
    // consumers pace themselves on newly decoded frames
    config.buffer.wait_for_fresh = true;
    if let Some(dir) = &cli.dump {
        config.dump.dir = dir.clone();
    }
    config.logging.level = match cli.verbose {
        0 => config.logging.level,
        1 => LogLevel::Low,
        2 => LogLevel::Medium,
        _ => LogLevel::High,
    };
    telemetry::init(&config.logging)?;

    if config.stream.url.is_empty() {
        return Err(eyre!("no input: pass --input or set stream.url"));
    }
    let params = cli.frame_parameters();
    params.validate()?;

    let factory: Arc<dyn DecoderFactory> = if config.stream.url.starts_with("synthetic://") {
        Arc::new(SyntheticFactory)
    } else {
        Arc::new(RawFileFactory {
            raw: config.stream.raw.clone(),
        })
    };

    info!("tensor-stream launching on {}", config.stream.url);
    let stream = Arc::new(TensorStream::new(config, factory)?);
    let info = {
        let stream = stream.clone();
        tokio::task::spawn_blocking(move || stream.initialize()).await??
    };
    info!(
        fps = info.fps(),
        width = info.width,
        height = info.height,
        "Stream ready"
    );
    stream.start()?;

    let mut consumers = JoinSet::new();
    for n in 0..cli.consumers {
        let stream = stream.clone();
        let name = format!("consumer-{n}");
        let (delay, frames, dump) = (cli.delay, cli.frames, cli.dump.is_some());
        consumers.spawn_blocking(move || {
            let served = consume(&stream, &name, delay, &params, frames, dump);
            (name, served)
        });
    }

    let report = |joined: std::result::Result<(String, tensor_stream::Result<u64>), tokio::task::JoinError>| match joined {
        Ok((name, Ok(served))) => info!(consumer = %name, served, "Consumer done"),
        Ok((name, Err(e))) => error!(consumer = %name, "Consumer failed: {e}"),
        Err(e) => error!("Consumer task failed: {e}"),
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted, stopping"),
        _ = async {
            while let Some(joined) = consumers.join_next().await {
                report(joined);
            }
        } => info!("All consumers finished"),
    }

    {
        let stream = stream.clone();
        tokio::task::spawn_blocking(move || stream.stop()).await?;
    }
    while let Some(joined) = consumers.join_next().await {
        report(joined);
    }

    let stats = stream.stats();
    info!(
        written = stats.written,
        dropped = stats.dropped,
        lapsed = stats.lapsed,
        reads = stats.reads,
        "tensor-stream shutting down"
    );
    if let Some(failure) = stream.failure() {
        return Err(eyre!("ingestion failed: {failure}"));
    }
    Ok(())
}
