pub mod averager;
pub mod collector;
pub mod color;
pub mod downsampler;
pub mod frame;
pub mod sequence;
pub mod utils;
