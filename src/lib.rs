pub mod app;
pub mod archive;
pub mod cds;
pub mod cf;
pub mod config;
pub mod dataset;
pub mod domain;
pub mod ecmwf;
pub mod error;
pub mod fragment;
pub mod fs_util;
pub mod harmonize;
mod http;
pub mod output;
pub mod partition;
pub mod planner;
pub mod schedule;
pub mod source;
pub mod store;
pub mod zarr;
