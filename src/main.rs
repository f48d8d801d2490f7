use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use freenect_core::{
    device::enumerate_devices,
    fakenect::{Playback, PlaybackEvent},
    settings::supported_modes,
    Config, DecodedFrame, DepthFormat, Error, VideoFormat,
};

#[derive(Parser)]
#[command(name = "freenect")]
#[command(about = "Kinect camera frame decoding and recording playback")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached Kinect sub-devices
    List,

    /// Print the supported frame modes
    Modes,

    /// Play back a recording directory
    Play {
        /// Directory holding INDEX.txt
        dir: PathBuf,

        /// Depth format to decode, depth lines are skipped without it
        #[arg(short, long)]
        depth: Option<DepthArg>,

        /// Video format to decode, video lines are skipped without it
        #[arg(short, long)]
        video: Option<VideoArg>,

        /// Stop after this many index lines
        #[arg(short, long)]
        count: Option<usize>,

        /// Stop at the end of the index instead of rewinding
        #[arg(long)]
        once: bool,

        /// Ignore the recorded pace
        #[arg(long)]
        fast: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DepthArg {
    #[value(name = "11bit")]
    Depth11Bit,
    #[value(name = "11bit-packed")]
    Depth11BitPacked,
    Registered,
    Mm,
}

impl From<DepthArg> for DepthFormat {
    fn from(value: DepthArg) -> Self {
        match value {
            DepthArg::Depth11Bit => Self::Depth11Bit,
            DepthArg::Depth11BitPacked => Self::Depth11BitPacked,
            DepthArg::Registered => Self::Registered,
            DepthArg::Mm => Self::Mm,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum VideoArg {
    Rgb,
    YuvRgb,
    YuvRaw,
}

impl From<VideoArg> for VideoFormat {
    fn from(value: VideoArg) -> Self {
        match value {
            VideoArg::Rgb => Self::Rgb,
            VideoArg::YuvRgb => Self::YuvRgb,
            VideoArg::YuvRaw => Self::YuvRaw,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List => list(),
        Commands::Modes => {
            modes();
            Ok(())
        }
        Commands::Play {
            dir,
            depth,
            video,
            count,
            once,
            fast,
        } => {
            let config = Config {
                loop_playback: !once,
                ..Config::default()
            };
            play(dir, depth.map(Into::into), video.map(Into::into), count, fast, &config).await
        }
    }
}

fn list() -> Result<(), Error> {
    let devices = enumerate_devices()?;

    if devices.is_empty() {
        println!("No Kinect found");
    }
    for device in devices {
        println!("{device}");
    }

    Ok(())
}

fn modes() {
    for mode in supported_modes() {
        println!(
            "{:<28} {:>4}x{:<4} {:>2} fps {:>8} bytes ({} on the wire)",
            mode.format.to_string(),
            mode.width,
            mode.height,
            mode.framerate,
            mode.bytes,
            mode.raw_bytes
        );
    }
}

fn describe(frame: &DecodedFrame) {
    println!(
        "{} #{} timestamp {} ({} bytes)",
        frame.format(),
        frame.sequence,
        frame.timestamp,
        frame.buffer.byte_len()
    );
}

async fn play(
    dir: PathBuf,
    depth: Option<DepthFormat>,
    video: Option<VideoFormat>,
    count: Option<usize>,
    fast: bool,
    config: &Config,
) -> Result<(), Error> {
    let mut playback = Playback::open(dir, depth, video, config)?;
    if playback.is_empty() {
        println!("Empty recording");
        return Ok(());
    }

    playback.set_depth_callback(describe);
    playback.set_video_callback(describe);

    let mut processed = 0;

    while count.map_or(true, |count| processed < count) {
        let event = if fast {
            playback.process_next()?
        } else {
            playback.play_next().await?
        };

        match event {
            None => break,
            Some(PlaybackEvent::Rewound) => log::debug!("Rewinding"),
            Some(_) => processed += 1,
        }
    }

    Ok(())
}
