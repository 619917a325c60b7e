use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing_subscriber::EnvFilter;
use video_vibes::{
    BarcodeConfig, BarcodePipeline, ColorSequence, FrameEvent, PipelineConfig, RecordOrder, SourceError,
    frame_channel, render_sequence, save_png,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Order {
    /// Columns follow the video timeline.
    Submission,
    /// Columns follow the order frames finished averaging.
    Completion,
}

impl From<Order> for RecordOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Submission => RecordOrder::Submission,
            Order::Completion => RecordOrder::Completion,
        }
    }
}

/// Render a color barcode from the frames of a video.
#[derive(Debug, Parser)]
#[command(name = "vibes_tester", version)]
struct Args {
    /// A directory of frame images, a saved frame-data `.json` file, or a video
    /// file (requires the `video` feature).
    input: PathBuf,
    /// Barcode width in pixels; one column per time window.
    #[arg(long, default_value_t = 5120)]
    width: u32,
    /// Barcode height in pixels.
    #[arg(long, default_value_t = 1440)]
    height: u32,
    /// Window widths averaged per column.
    #[arg(long, default_value_t = 1)]
    smoothing: usize,
    /// Concurrent averaging tasks; defaults to the number of CPUs.
    #[arg(long)]
    max_concurrency: Option<usize>,
    #[arg(long, value_enum, default_value_t = Order::Submission)]
    order: Order,
    /// Decoded frames buffered between the reader and the pipeline.
    #[arg(long, default_value_t = 2048)]
    frame_buffer: usize,
    #[arg(short, long, default_value = "out.png")]
    output: PathBuf,
    /// Where to persist the per-frame colors for later re-renders.
    #[arg(long, default_value = "frames.json")]
    frames_out: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Logging & Argument Parsing ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let barcode = BarcodeConfig {
        width: args.width,
        height: args.height,
        smoothing: args.smoothing,
    };
    barcode.validate()?;

    // --- 2. Frame Colors: either saved frame data or a fresh pipeline run ---
    let sequence = if is_frame_data(&args.input) {
        ColorSequence::load_json(&args.input)
            .with_context(|| format!("failed to load frame data from {}", args.input.display()))?
    } else {
        let sequence = average_frames(&args).await?;
        if let Err(error) = sequence.save_json(&args.frames_out) {
            tracing::warn!(%error, path = %args.frames_out.display(), "could not write frame data");
        }
        sequence
    };

    // --- 3. Downsample & Render ---
    let image = render_sequence(&sequence, &barcode)
        .with_context(|| format!("cannot render {} colors into a {}-column barcode", sequence.len(), barcode.width))?;
    save_png(&args.output, &image).with_context(|| format!("failed to write {}", args.output.display()))?;

    println!("Processing complete. Output saved to {}", args.output.display());
    Ok(())
}

fn is_frame_data(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("json"))
}

async fn average_frames(args: &Args) -> Result<ColorSequence> {
    let defaults = PipelineConfig::default();
    let config = PipelineConfig {
        max_concurrency: args.max_concurrency.unwrap_or(defaults.max_concurrency),
        record_order: args.order.into(),
        ..defaults
    };

    let (sender, source) = frame_channel(args.frame_buffer);
    let reader = spawn_reader(args.input.clone(), sender)?;

    let mut pipeline = BarcodePipeline::new(config)?;
    let report = pipeline.run(source).await?;
    reader.await.context("frame reader panicked")??;

    tracing::info!(
        frames = report.stats.frames_submitted,
        skipped = report.stats.frames_failed + report.stats.source_errors,
        "frames processing done"
    );
    Ok(report.sequence)
}

fn spawn_reader(input: PathBuf, sender: mpsc::Sender<FrameEvent>) -> Result<JoinHandle<Result<()>>> {
    if input.is_dir() {
        return Ok(tokio::task::spawn_blocking(move || stream_directory(&input, sender)));
    }
    if !input.is_file() {
        bail!("input {} does not exist", input.display());
    }

    spawn_video_reader(input, sender)
}

#[cfg(feature = "video")]
fn spawn_video_reader(input: PathBuf, sender: mpsc::Sender<FrameEvent>) -> Result<JoinHandle<Result<()>>> {
    Ok(tokio::task::spawn_blocking(move || video::stream_video(&input, sender)))
}

#[cfg(not(feature = "video"))]
fn spawn_video_reader(input: PathBuf, _sender: mpsc::Sender<FrameEvent>) -> Result<JoinHandle<Result<()>>> {
    bail!(
        "{} is not a directory or frame-data file; rebuild with `--features video` to decode video files",
        input.display()
    )
}

/// Sends every image in `dir`, in file-name order, followed by end of stream.
fn stream_directory(dir: &Path, sender: mpsc::Sender<FrameEvent>) -> Result<()> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read frame directory {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file())
        .collect();
    paths.sort();
    tracing::info!(frames = paths.len(), dir = %dir.display(), "reading frame images");

    for path in paths {
        let event = match image::open(&path) {
            Ok(image) => FrameEvent::Frame(image.into()),
            Err(error) => FrameEvent::Error(SourceError::new(format!("{}: {}", path.display(), error))),
        };
        if sender.blocking_send(event).is_err() {
            // Pipeline stopped listening.
            return Ok(());
        }
    }
    let _ = sender.blocking_send(FrameEvent::EndOfStream);
    Ok(())
}

#[cfg(feature = "video")]
mod video {
    use anyhow::{Result, bail};
    use opencv::{
        core::Mat,
        imgproc,
        prelude::*,
        videoio::{self, VideoCapture},
    };
    use std::path::Path;
    use tokio::sync::mpsc;
    use video_vibes::{Frame, FrameEvent, PixelLayout, SourceError};

    /// Decodes a video file with OpenCV and sends its frames as RGB.
    pub fn stream_video(path: &Path, sender: mpsc::Sender<FrameEvent>) -> Result<()> {
        let mut cap = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;
        if !cap.is_opened()? {
            bail!("error opening video file {}", path.display());
        }

        let mut frame = Mat::default();
        loop {
            let event = match cap.read(&mut frame) {
                Ok(true) if !frame.empty() => convert(&frame),
                Ok(_) => break,
                Err(error) => {
                    // Reader state is unknown after a failed read; stop here.
                    let _ = sender.blocking_send(FrameEvent::Error(SourceError::new(error.to_string())));
                    break;
                }
            };
            if sender.blocking_send(event).is_err() {
                return Ok(());
            }
        }
        let _ = sender.blocking_send(FrameEvent::EndOfStream);
        Ok(())
    }

    fn convert(bgr: &Mat) -> FrameEvent {
        let mut rgb = Mat::default();
        let converted = imgproc::cvt_color(bgr, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .and_then(|_| rgb.data_bytes().map(|bytes| bytes.to_vec()));
        let frame = converted
            .map_err(|error| SourceError::new(error.to_string()))
            .and_then(|data| {
                Frame::new(rgb.cols() as u32, rgb.rows() as u32, PixelLayout::Rgb8, data)
                    .map_err(|error| SourceError::new(error.to_string()))
            });
        match frame {
            Ok(frame) => FrameEvent::Frame(frame),
            Err(error) => FrameEvent::Error(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vibes_tester_{}_{}", std::process::id(), name));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn directory_frames_arrive_in_name_order_then_end_of_stream() {
        let dir = scratch_dir("frames");
        image::RgbImage::from_pixel(4, 4, image::Rgb([200, 0, 0])).save(dir.join("frame_002.png")).unwrap();
        image::RgbImage::from_pixel(4, 4, image::Rgb([0, 0, 200])).save(dir.join("frame_001.png")).unwrap();
        std::fs::write(dir.join("frame_003.png"), b"not a png").unwrap();

        let (sender, mut receiver) = mpsc::channel(16);
        stream_directory(&dir, sender).unwrap();
        std::fs::remove_dir_all(&dir).ok();

        let mut events = Vec::new();
        while let Ok(event) = receiver.try_recv() {
            events.push(event);
        }
        assert_eq!(events.len(), 4);
        match &events[0] {
            FrameEvent::Frame(frame) => assert_eq!(&frame.data()[..3], &[0, 0, 200]),
            other => panic!("unexpected: {:?}", other),
        }
        match &events[1] {
            FrameEvent::Frame(frame) => assert_eq!(&frame.data()[..3], &[200, 0, 0]),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(matches!(events[2], FrameEvent::Error(_)));
        assert!(matches!(events[3], FrameEvent::EndOfStream));
    }

    #[test]
    fn missing_directory_is_an_error() {
        let (sender, _receiver) = mpsc::channel(1);
        assert!(stream_directory(Path::new("/definitely/not/here"), sender).is_err());
    }

    #[test]
    fn only_json_files_count_as_frame_data() {
        let dir = scratch_dir("json");
        let data = dir.join("frames.JSON");
        std::fs::write(&data, b"[]").unwrap();

        assert!(is_frame_data(&data));
        assert!(!is_frame_data(&dir));
        assert!(!is_frame_data(&dir.join("missing.json")));
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn arguments_default_to_full_size_barcode() {
        let args = Args::try_parse_from(["vibes_tester", "frames/"]).unwrap();
        assert_eq!((args.width, args.height, args.smoothing), (5120, 1440, 1));
        assert_eq!(args.order, Order::Submission);
        assert_eq!(args.frame_buffer, 2048);
    }
}
