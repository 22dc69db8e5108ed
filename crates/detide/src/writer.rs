use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{error, trace, warn};

use crate::error::Result;
use crate::record::{MinuteStamp, OutputRecord};

/// Largest payload written for a single record; longer payloads are truncated.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

enum Target {
    /// Minute bucket files under a directory, replaced atomically.
    Directory(PathBuf),
    /// Payloads on a text stream, each ending in exactly one newline.
    Stream(Box<dyn Write + Send>),
}

/// Persists or forwards transform output. The mode is fixed at construction.
pub struct OutputWriter {
    target: Target,
}

impl OutputWriter {
    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            target: Target::Directory(dir.into()),
        }
    }

    pub fn stdout() -> Self {
        Self::stream(Box::new(io::stdout()))
    }

    /// Write each payload to `out` with trailing newlines collapsed to one, flushing after
    /// every payload. A payload is a line per sample, so a payload holding several samples
    /// of one minute occupies several consecutive lines.
    pub fn stream(out: Box<dyn Write + Send>) -> Self {
        Self {
            target: Target::Stream(out),
        }
    }

    /// Directory mode when `dir` is given, otherwise stdout.
    pub fn from_option(dir: Option<PathBuf>) -> Self {
        match dir {
            Some(dir) => Self::directory(dir),
            None => Self::stdout(),
        }
    }

    pub fn output_dir(&self) -> Option<&Path> {
        match &self.target {
            Target::Directory(dir) => Some(dir),
            Target::Stream(_) => None,
        }
    }

    /// Write a record, logging and dropping it on failure.
    pub fn write(&mut self, record: &OutputRecord) {
        if let Err(e) = self.try_write(record) {
            error!(source = %record.source_id, minute = %record.minute, error = %e, "Failed to write output record");
        }
    }

    pub fn try_write(&mut self, record: &OutputRecord) -> Result<()> {
        if record.payload.is_empty() {
            return Ok(());
        }
        let payload = clamp_payload(&record.source_id, &record.payload);

        match &mut self.target {
            Target::Directory(dir) => {
                let (bucket, tmp) = bucket_paths(dir, &record.source_id, &record.minute);
                replace_with_appended(&bucket, &tmp, payload.as_bytes())?;
                trace!(path = %bucket.display(), bytes = payload.len(), "Bucket updated");
            }
            Target::Stream(out) => {
                writeln!(out, "{}", payload.trim_end_matches('\n'))?;
                out.flush()?;
            }
        }
        Ok(())
    }
}

/// Canonical bucket path and its hidden temporary sibling.
pub fn bucket_paths(dir: &Path, source_id: &str, minute: &MinuteStamp) -> (PathBuf, PathBuf) {
    let name = format!("{}.{}.txt", source_id, minute);
    (dir.join(&name), dir.join(format!(".{}", name)))
}

/// Build `tmp` as the current `bucket` contents plus `payload`, then rename it over `bucket`.
fn replace_with_appended(bucket: &Path, tmp: &Path, payload: &[u8]) -> io::Result<()> {
    let mut file = File::create(tmp)?;
    match File::open(bucket) {
        Ok(mut existing) => {
            io::copy(&mut existing, &mut file)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    file.write_all(payload)?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, bucket)
}

fn clamp_payload<'a>(source_id: &str, payload: &'a str) -> &'a str {
    if payload.len() <= MAX_PAYLOAD_BYTES {
        return payload;
    }
    let mut end = MAX_PAYLOAD_BYTES;
    while !payload.is_char_boundary(end) {
        end -= 1;
    }
    warn!(
        source = %source_id,
        bytes = payload.len(),
        kept = end,
        "Payload exceeds capacity, truncating"
    );
    &payload[..end]
}
