//! Writing collected snapshots outside of the HTTP service.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

/// Writes `records` as a pretty-printed JSON array followed by a newline.
pub fn write_json<W: Write, T: Serialize>(writer: W, records: &[T]) -> Result<()> {
    let mut writer = BufWriter::new(writer);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Saves `records` to `path`, creating parent directories, or prints them to
/// stdout when no path is given.
pub fn save_snapshot<T: Serialize>(path: Option<&Path>, records: &[T]) -> Result<()> {
    match path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                fs::create_dir_all(dir)
                    .with_context(|| format!("creating {}", dir.display()))?;
            }
            debug!(path = %path.display(), "Writing snapshot");
            let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
            write_json(file, records)?;
            info!(path = %path.display(), count = records.len(), "Snapshot saved");
        }
        None => write_json(io::stdout().lock(), records)?,
    }
    Ok(())
}
