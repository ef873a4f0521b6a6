pub mod checksum;
pub mod config;
pub mod control;
pub mod downloader;
pub mod events;
pub mod host;
pub mod limiter;
pub mod logging;
pub mod persistence;
pub mod probe;
pub mod queue;
pub mod resume;
pub mod retry;
pub mod segmenter;
pub mod storage;
