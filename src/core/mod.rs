pub mod artifacts;
pub mod audio;
pub mod dsp;
pub mod ingest;
pub mod pipeline;
pub mod render;
pub mod service;
