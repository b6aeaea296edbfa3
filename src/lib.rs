//! Pressroom: HTML to PDF rendering on a bounded pool of headless browsers.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
mod util;
