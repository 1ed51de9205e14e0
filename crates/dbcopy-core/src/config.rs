//! Copy configuration.
//!
//! Passed explicitly to every codec and copier call; nothing here is read
//! from process-wide state.

use std::time::Duration;

use encoding_rs::Encoding;

use crate::codec::encoding;
use crate::codec::format::DoubleFormat;
use crate::error::Result;

/// Default interval between progress log lines
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// How value tables are converted to and from CSV.
#[derive(Debug, Clone, Default)]
pub struct CodecConfig {
    /// Format of `double` values in CSV output
    pub double_format: DoubleFormat,
    /// Encoding of CSV input; `None` means UTF-8
    pub encoding: Option<&'static Encoding>,
    /// Write dimension items and keys as numeric ids instead of names
    pub id_csv: bool,
    /// Prefix CSV output with a UTF-8 byte-order mark
    pub utf8_bom: bool,
    /// Skip output table accumulators
    pub no_accumulators: bool,
    /// Skip microdata
    pub no_microdata: bool,
}

impl CodecConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the double format from a printf-style spec; empty means round-trip.
    pub fn with_double_format(mut self, spec: &str) -> Result<Self> {
        self.double_format = DoubleFormat::parse(spec)?;
        Ok(self)
    }

    /// Set the input encoding by label, e.g. `windows-1252`.
    pub fn with_encoding(mut self, label: &str) -> Result<Self> {
        self.encoding = Some(encoding::lookup(label)?);
        Ok(self)
    }

    pub fn with_id_csv(mut self, id_csv: bool) -> Self {
        self.id_csv = id_csv;
        self
    }

    pub fn with_utf8_bom(mut self, utf8_bom: bool) -> Self {
        self.utf8_bom = utf8_bom;
        self
    }

    pub fn without_accumulators(mut self) -> Self {
        self.no_accumulators = true;
        self
    }

    pub fn without_microdata(mut self) -> Self {
        self.no_microdata = true;
        self
    }
}

/// Options of one copy invocation.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub codec: CodecConfig,
    /// Minimum time between progress log lines
    pub progress_interval: Duration,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            codec: CodecConfig::default(),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

impl CopyOptions {
    pub fn new(codec: CodecConfig) -> Self {
        Self {
            codec,
            ..Self::default()
        }
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = CodecConfig::new();
        assert_eq!(cfg.double_format, DoubleFormat::RoundTrip);
        assert!(cfg.encoding.is_none());
        assert!(!cfg.id_csv);

        let opts = CopyOptions::default();
        assert_eq!(opts.progress_interval, DEFAULT_PROGRESS_INTERVAL);
    }

    #[test]
    fn test_builders() {
        let cfg = CodecConfig::new()
            .with_double_format("%.8g")
            .unwrap()
            .with_encoding("latin1")
            .unwrap()
            .with_id_csv(true)
            .without_accumulators();
        assert_eq!(cfg.double_format, DoubleFormat::General(8));
        assert_eq!(cfg.encoding.map(|e| e.name()), Some("windows-1252"));
        assert!(cfg.id_csv);
        assert!(cfg.no_accumulators);
        assert!(!cfg.no_microdata);
    }

    #[test]
    fn test_bad_format_rejected_at_build() {
        assert!(CodecConfig::new().with_double_format("%s").is_err());
        assert!(CodecConfig::new().with_encoding("nope").is_err());
    }
}
