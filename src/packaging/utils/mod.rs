//! Utility helpers for staging and downloads.

pub mod fs;
pub mod http;
