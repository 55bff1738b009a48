#![forbid(unsafe_code)]

pub mod browser;
pub mod cli;
pub mod config;
pub mod crawl;
pub mod epub;
pub mod images;
pub mod logging;
pub mod render;
pub mod sanitize;
pub mod session;
