use tracing::{debug, trace};

use crate::error::Result;
use crate::filter::FilterCatalog;
use crate::registry::{StreamDefaults, StreamRegistry};
use crate::tidal::TidalConfig;
use crate::traits::{RecordDecoder, Transform};
use crate::writer::OutputWriter;

/// Process-wide processing context shared by both ingestion front ends.
///
/// Owns the configuration, filter catalog, stream registry and output writer;
/// every raw record passes through [`Dispatcher::dispatch`].
pub struct Dispatcher {
    defaults: StreamDefaults,
    tidal: TidalConfig,
    catalog: FilterCatalog,
    registry: StreamRegistry,
    decoder: Box<dyn RecordDecoder>,
    transform: Box<dyn Transform>,
    output: OutputWriter,
}

impl Dispatcher {
    pub fn new(
        defaults: StreamDefaults,
        tidal: TidalConfig,
        catalog: FilterCatalog,
        decoder: Box<dyn RecordDecoder>,
        transform: Box<dyn Transform>,
        output: OutputWriter,
    ) -> Self {
        Self {
            defaults,
            tidal,
            catalog,
            registry: StreamRegistry::new(),
            decoder,
            transform,
            output,
        }
    }

    /// Decode, resolve the owning stream and run the transform, writing every
    /// emitted minute. Returns the number of samples packed.
    ///
    /// Decode errors are returned unlogged; the caller logs them and decides
    /// whether to continue. Fatal errors (see [`crate::DetideError::is_fatal`])
    /// must stop the process.
    pub fn dispatch(&mut self, raw: &[u8]) -> Result<usize> {
        let record = self.decoder.decode(raw)?;
        trace!(
            source = %record.source_id,
            start = %record.start,
            samples = record.samples.len(),
            rate = record.sample_rate,
            "Record"
        );

        let stream = self.registry.resolve(
            &record.source_id,
            &self.defaults,
            record.sample_rate,
            &self.catalog,
        )?;

        let output = &mut self.output;
        let packed = self
            .transform
            .apply(&record, stream, &self.tidal, &mut |out| output.write(&out))?;

        debug!(source = %record.source_id, packed, "packed: {} samples", packed);
        Ok(packed)
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn tidal(&self) -> &TidalConfig {
        &self.tidal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DetideError;
    use crate::record::{DecodedRecord, JsonRecordDecoder, OutputRecord};
    use crate::registry::Stream;
    use crate::transform::HarmonicTransform;
    use std::fs;
    use tempfile::TempDir;

    fn raw(station: &str, start: &str, samples: &[f64]) -> Vec<u8> {
        serde_json::json!({
            "network": "NZ",
            "station": station,
            "location": "40",
            "channel": "BTT",
            "start": start,
            "sample_rate": 1.0,
            "samples": samples,
        })
        .to_string()
        .into_bytes()
    }

    fn dispatcher(dir: &TempDir, filters: Vec<String>) -> Dispatcher {
        let tidal = TidalConfig::default();
        let transform = HarmonicTransform::new(&tidal).unwrap();
        Dispatcher::new(
            StreamDefaults {
                tag: String::new(),
                alpha: 0.0,
                beta: 1.0,
                filters,
            },
            tidal,
            FilterCatalog::default(),
            Box::new(JsonRecordDecoder::new()),
            Box::new(transform),
            OutputWriter::directory(dir.path()),
        )
    }

    #[test]
    fn test_dispatch_writes_bucket() {
        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, vec![]);

        let packed = d
            .dispatch(&raw("TGA", "2024-03-07T04:09:00Z", &[1.0, 2.0]))
            .unwrap();
        assert_eq!(packed, 2);

        let content = fs::read_to_string(tmp.path().join("NZ_TGA_40_BTT.202403070409.txt")).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert_eq!(d.registry().len(), 1);
    }

    #[test]
    fn test_registry_counts_distinct_sources() {
        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, vec![]);
        for station in ["TGA", "NCT", "TGA", "GIS", "NCT", "TGA"] {
            d.dispatch(&raw(station, "2024-03-07T04:09:00Z", &[1.0])).unwrap();
        }
        assert_eq!(d.registry().len(), 3);
    }

    #[test]
    fn test_decode_error_drops_record() {
        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, vec![]);
        let err = d.dispatch(b"{garbage").unwrap_err();
        assert!(matches!(err, DetideError::Decode(_)));
        assert!(d.registry().is_empty());
    }

    #[test]
    fn test_decode_error_left_to_caller_to_log() {
        #[derive(Clone, Default)]
        struct Captured(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

        impl std::io::Write for Captured {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();

        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, vec![]);
        tracing::subscriber::with_default(subscriber, || {
            assert!(d.dispatch(b"{garbage").is_err());
        });
        assert!(captured.0.lock().unwrap().is_empty());
    }

    #[test]
    fn test_far_future_start_is_transform_error() {
        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, vec![]);
        let err = d
            .dispatch(&raw("TGA", "+262142-12-31T23:59:59Z", &[1.0, 2.0]))
            .unwrap_err();
        assert!(matches!(err, DetideError::Transform(_)));
        assert!(!err.is_fatal());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_unknown_filter_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let mut d = dispatcher(&tmp, vec!["fir2".into()]);
        let err = d
            .dispatch(&raw("TGA", "2024-03-07T04:09:00Z", &[1.0]))
            .unwrap_err();
        assert!(err.is_fatal());
    }

    struct FailingTransform;

    impl Transform for FailingTransform {
        fn apply(
            &mut self,
            _record: &DecodedRecord,
            _stream: &mut Stream,
            _tidal: &TidalConfig,
            emit: &mut dyn FnMut(OutputRecord),
        ) -> Result<usize> {
            let _ = emit;
            Err(DetideError::Transform("boom".into()))
        }
    }

    #[test]
    fn test_transform_failure_keeps_registry() {
        let tmp = TempDir::new().unwrap();
        let mut d = Dispatcher::new(
            StreamDefaults::default(),
            TidalConfig::default(),
            FilterCatalog::default(),
            Box::new(JsonRecordDecoder::new()),
            Box::new(FailingTransform),
            OutputWriter::directory(tmp.path()),
        );
        let err = d
            .dispatch(&raw("TGA", "2024-03-07T04:09:00Z", &[1.0]))
            .unwrap_err();
        assert!(matches!(err, DetideError::Transform(_)));
        assert_eq!(d.registry().len(), 1);
    }
}
