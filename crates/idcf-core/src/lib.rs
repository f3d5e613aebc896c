pub mod config;
pub mod logging;

pub mod checkpoint;
pub mod checksum;
pub mod control;
pub mod error;
pub mod index;
pub mod manifest;
pub mod orchestrator;
pub mod progress;
pub mod retry;
pub mod space;
pub mod storage;
pub mod transfer;
pub mod validate;
