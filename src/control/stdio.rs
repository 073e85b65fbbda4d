//! Stdout writer for the UI bridge.
//!
//! # Important
//!
//! - **stdout**: one JSON event per line
//! - **stderr**: logs, debug output (not parsed by the host)
//! - **Never use `println!`**: It may add `\r\n` on Windows

use std::io::Write;

/// Write a line to stdout.
///
/// Writes the string followed by a single `\n` and flushes, so the host
/// sees every reading as soon as it is decoded.
///
/// # Errors
///
/// Returns IO error if write or flush fails.
pub fn write_stdout_line(line: &str) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    handle.write_all(line.as_bytes())?;
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Write a value to stdout as a single JSON line.
///
/// # Errors
///
/// Returns error if serialization or write fails.
pub fn write_stdout_json<T: serde::Serialize>(value: &T) -> crate::error::Result<()> {
    let json = serde_json::to_string(value)?;
    write_stdout_line(&json)?;
    Ok(())
}
