pub mod brands;
pub mod cli;
pub mod config;
pub mod counters;
pub mod error;
pub mod monitor;
pub mod processor;
pub mod run;
pub mod service;
pub mod source;
pub mod tracking;
pub mod uploader;
