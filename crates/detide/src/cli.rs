//! Command-line options shared by the batch and live binaries.

use std::path::PathBuf;

use clap::{ArgAction, Args};
use tracing::info;

use crate::dispatcher::Dispatcher;
use crate::error::Result;
use crate::filter::FilterCatalog;
use crate::record::JsonRecordDecoder;
use crate::registry::StreamDefaults;
use crate::tidal::{Constituent, TidalConfig};
use crate::transform::HarmonicTransform;
use crate::writer::OutputWriter;

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Increase verbosity (repeatable)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Directory for GTS minute files
    #[arg(short = 'G', long, env = "DETIDE_GTS")]
    pub gts: Option<PathBuf>,

    /// Calibration offset
    #[arg(short = 'A', long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub alpha: f64,

    /// Calibration gain (program default when unset)
    #[arg(short = 'B', long, allow_negative_numbers = true)]
    pub beta: Option<f64>,

    /// Station latitude
    #[arg(short = 'L', long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub latitude: f64,

    /// Reference time zone offset in hours
    #[arg(short = 'Z', long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub zone: f64,

    /// Tidal constituent as name/amplitude/lag-degrees (repeatable)
    #[arg(short = 'T', long = "tide", value_name = "NAME/AMP/LAG")]
    pub tide: Vec<Constituent>,

    /// FIR filter definitions file
    #[arg(short = 'N', long, env = "DETIDE_FIRFILE", default_value = "filters.fir")]
    pub firfile: PathBuf,

    /// FIR filter to apply, in order (repeatable)
    #[arg(short = 'F', long = "filter", value_name = "NAME")]
    pub filters: Vec<String>,

    /// Tag written at the start of every output line
    #[arg(short = 'I', long, default_value = "")]
    pub tag: String,
}

impl CommonArgs {
    pub fn tidal_config(&self) -> TidalConfig {
        TidalConfig::new(self.latitude, self.zone, self.tide.clone())
    }

    pub fn stream_defaults(&self, default_beta: f64) -> StreamDefaults {
        StreamDefaults {
            tag: self.tag.clone(),
            alpha: self.alpha,
            beta: self.beta.unwrap_or(default_beta),
            filters: self.filters.clone(),
        }
    }

    /// The filter file is only read when at least one filter is requested.
    pub fn filter_catalog(&self) -> Result<FilterCatalog> {
        if self.filters.is_empty() {
            return Ok(FilterCatalog::default());
        }
        let catalog = FilterCatalog::load(&self.firfile)?;
        info!(path = %self.firfile.display(), filters = catalog.len(), "Loaded fir filters");
        Ok(catalog)
    }

    /// Build the processing context with the JSON decoder and harmonic transform.
    pub fn build_dispatcher(&self, default_beta: f64, output: OutputWriter) -> Result<Dispatcher> {
        let tidal = self.tidal_config();
        let transform = HarmonicTransform::new(&tidal)?;
        let catalog = self.filter_catalog()?;
        Ok(Dispatcher::new(
            self.stream_defaults(default_beta),
            tidal,
            catalog,
            Box::new(JsonRecordDecoder::new()),
            Box::new(transform),
            output,
        ))
    }

    /// Dump the effective configuration at info level.
    pub fn log_config(&self, default_beta: f64) {
        let defaults = self.stream_defaults(default_beta);
        info!(
            alpha = defaults.alpha,
            beta = defaults.beta,
            latitude = self.latitude,
            zone = self.zone,
            tag = %defaults.tag,
            filters = ?defaults.filters,
            "Tidal configuration"
        );
        for c in &self.tide {
            info!(constituent = %c, "Tidal constituent");
        }
    }
}
