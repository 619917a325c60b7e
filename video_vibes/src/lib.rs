// THEORY:
// This file is the main entry point for the `video_vibes` library crate.
// It follows the standard Rust convention of using `lib.rs` to define the public
// API that will be exposed to external consumers (like the `vibes_tester` CLI).
//
// The primary goal is to export the `BarcodePipeline` and its associated data
// structures (`PipelineConfig`, `FrameEvent`, `PipelineReport`, etc.) as the
// high-level interface for turning decoded frames into a color barcode. The
// building blocks (`core_modules`) stay public for callers that want to drive a
// single stage, such as re-rendering saved frame data without any frames.

pub mod core_modules;
pub mod error;
pub mod parallel_pipeline;
pub mod pipeline;

pub use crate::core_modules::averager::average_color;
pub use crate::core_modules::collector::RecordOrder;
pub use crate::core_modules::color::color::Color;
pub use crate::core_modules::downsampler::downsample;
pub use crate::core_modules::frame::frame::{Frame, PixelLayout};
pub use crate::core_modules::sequence::ColorSequence;
pub use crate::core_modules::utils::image_helper::image_helper::{render_barcode, render_sequence, save_png};
pub use crate::error::{ErrorSink, LoggingErrorSink, PipelineError, Result, SourceError};
pub use crate::pipeline::{
    BarcodeConfig, BarcodePipeline, FrameEvent, PipelineConfig, PipelineReport, PipelineState, PipelineStats,
    event_stream, frame_channel,
};
