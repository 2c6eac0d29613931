//! Command handler modules for rord-cli.
//!
//! Shared utilities used by multiple command paths live here.

pub mod apply;

use anyhow::{Context, Result};
use std::fs;

/// Read a UTF-8 text file, tolerating a leading BOM.
pub fn read_text(path: &str) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read failed: {path}"))?;
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
    String::from_utf8(bytes.to_vec()).with_context(|| format!("{path} must be UTF-8 text"))
}
