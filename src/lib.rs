pub mod cli;
pub mod config;
pub mod detection;
pub mod geometry;
pub mod history;
pub mod lane;
pub mod lane_speed_processor;
pub mod progress;
pub mod projector;
pub mod report;
pub mod ring_buffer;
pub mod source;
pub mod speed;
pub mod stream_processor;
pub mod track_store;
