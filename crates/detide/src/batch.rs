//! File-batch ingestion: newline-framed records from files or standard input.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::dispatcher::Dispatcher;
use crate::error::{DetideError, Result};

/// Location name standing for standard input.
pub const STDIN: &str = "-";

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LocationSummary {
    pub records: u64,
    pub packed: u64,
    /// Whether the location was abandoned before end of input.
    pub aborted: bool,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub locations: u64,
    pub records: u64,
    pub packed: u64,
    pub aborted: u64,
}

pub struct FileBatchReader {
    locations: Vec<PathBuf>,
}

impl FileBatchReader {
    /// An empty list reads standard input.
    pub fn new(locations: Vec<PathBuf>) -> Self {
        let locations = if locations.is_empty() {
            vec![PathBuf::from(STDIN)]
        } else {
            locations
        };
        Self { locations }
    }

    pub fn locations(&self) -> &[PathBuf] {
        &self.locations
    }

    /// Process every location in order. Only fatal errors are returned;
    /// anything else abandons the current location and moves to the next.
    pub fn run(&self, dispatcher: &mut Dispatcher) -> Result<BatchSummary> {
        let mut summary = BatchSummary::default();

        for location in &self.locations {
            let name = display_name(location);
            info!(location = %name, "process data");

            let result = if location.as_os_str() == STDIN {
                let stdin = io::stdin();
                Self::process_reader(&name, stdin.lock(), dispatcher)
            } else {
                match File::open(location) {
                    Ok(file) => Self::process_reader(&name, BufReader::new(file), dispatcher),
                    Err(e) => {
                        error!(location = %name, error = %e, "Failed to open input");
                        summary.aborted += 1;
                        continue;
                    }
                }
            };

            let loc = result?;
            info!(
                location = %name,
                records = loc.records,
                packed = loc.packed,
                aborted = loc.aborted,
                "Finished location"
            );
            summary.locations += 1;
            summary.records += loc.records;
            summary.packed += loc.packed;
            if loc.aborted {
                summary.aborted += 1;
            }
        }

        Ok(summary)
    }

    /// Dispatch each non-blank line of `reader` until end of input or the first failure.
    pub fn process_reader<R: BufRead>(
        name: &str,
        reader: R,
        dispatcher: &mut Dispatcher,
    ) -> Result<LocationSummary> {
        let mut summary = LocationSummary::default();

        for line in reader.split(b'\n') {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!(location = %name, error = %e, "error reading input");
                    summary.aborted = true;
                    break;
                }
            };
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            match dispatcher.dispatch(&line) {
                Ok(packed) => {
                    summary.records += 1;
                    summary.packed += packed as u64;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e @ DetideError::Decode(_)) => {
                    warn!(location = %name, record = summary.records + 1, error = %e, "Abandoning input after decode failure");
                    summary.aborted = true;
                    break;
                }
                Err(e) => {
                    error!(location = %name, error = %e, "error processing block");
                    summary.aborted = true;
                    break;
                }
            }
        }

        Ok(summary)
    }
}

fn display_name(location: &Path) -> String {
    if location.as_os_str() == STDIN {
        "<stdin>".to_string()
    } else {
        location.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterCatalog;
    use crate::record::JsonRecordDecoder;
    use crate::registry::StreamDefaults;
    use crate::tidal::TidalConfig;
    use crate::transform::HarmonicTransform;
    use crate::writer::OutputWriter;
    use std::fs;
    use std::io::Cursor;
    use tempfile::TempDir;

    const REC_A: &str = r#"{"network":"NZ","station":"TGA","location":"40","channel":"BTT","start":"2024-03-07T04:09:00Z","sample_rate":1.0,"samples":[1.0,2.0]}"#;
    const REC_B: &str = r#"{"network":"NZ","station":"NCT","location":"40","channel":"BTT","start":"2024-03-07T04:09:00Z","sample_rate":1.0,"samples":[3.0]}"#;

    fn dispatcher(out: &Path, filters: Vec<String>) -> Dispatcher {
        let tidal = TidalConfig::default();
        let transform = HarmonicTransform::new(&tidal).unwrap();
        Dispatcher::new(
            StreamDefaults {
                beta: 1.0,
                filters,
                ..Default::default()
            },
            tidal,
            FilterCatalog::default(),
            Box::new(JsonRecordDecoder::new()),
            Box::new(transform),
            OutputWriter::directory(out),
        )
    }

    #[test]
    fn test_empty_list_reads_stdin() {
        let reader = FileBatchReader::new(vec![]);
        assert_eq!(reader.locations(), &[PathBuf::from(STDIN)]);
    }

    #[test]
    fn test_process_reader_skips_blank_lines() {
        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(tmp.path(), vec![]);
        let input = format!("{}\n\n   \n{}\n", REC_A, REC_B);

        let summary = FileBatchReader::process_reader("test", Cursor::new(input), &mut d).unwrap();
        assert_eq!(summary.records, 2);
        assert_eq!(summary.packed, 3);
        assert!(!summary.aborted);
    }

    #[test]
    fn test_decode_failure_abandons_only_current_location() {
        let tmp = TempDir::new().unwrap();
        let out = tmp.path().join("gts");
        fs::create_dir(&out).unwrap();

        let bad = tmp.path().join("bad.jsonl");
        fs::write(&bad, format!("{}\nnot-a-record\n{}\n", REC_A, REC_B)).unwrap();
        let good = tmp.path().join("good.jsonl");
        fs::write(&good, format!("{}\n", REC_B)).unwrap();

        let mut d = dispatcher(&out, vec![]);
        let reader = FileBatchReader::new(vec![bad, tmp.path().join("missing.jsonl"), good]);
        let summary = reader.run(&mut d).unwrap();

        assert_eq!(summary.locations, 2);
        assert_eq!(summary.records, 2);
        assert_eq!(summary.aborted, 2);
        assert_eq!(d.registry().len(), 2);
    }

    #[test]
    fn test_fatal_error_stops_run() {
        let tmp = TempDir::new().unwrap();
        let input = tmp.path().join("in.jsonl");
        fs::write(&input, format!("{}\n", REC_A)).unwrap();

        let mut d = dispatcher(tmp.path(), vec!["missing".into()]);
        let err = FileBatchReader::new(vec![input]).run(&mut d).unwrap_err();
        assert!(matches!(err, DetideError::FilterNotFound(_)));
    }
}
