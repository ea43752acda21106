// Kagami Library

pub mod access_log;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod detector;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod rate_limit;
pub mod request_coalescing;
pub mod retry;
pub mod storage;
pub mod tier;
pub mod watermark;
