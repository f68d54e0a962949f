//! Tracing setup for the command line tool.
//!
//! Events go to stderr so they do not interleave with operator prompts on
//! stdout. `RUST_LOG` overrides the configured level.
//!
//! # Example
//! ```no_run
//! use il_sts::telemetry::{self, OutputFormat, TracingConfig};
//! use tracing::Level;
//!
//! telemetry::init(&TracingConfig::new(Level::DEBUG).with_format(OutputFormat::Json));
//! ```

use sts_core::{StsConfig, StsError, StsResult};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// How events are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Multi-line with colors, for a person at the bench
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

/// Subscriber settings for one run of the tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Most verbose level shown when `RUST_LOG` is unset.
    pub level: Level,
    /// Rendering of events.
    pub format: OutputFormat,
    /// Also emit an event when a span opens and closes.
    pub span_events: bool,
    /// Colors in pretty output.
    pub ansi: bool,
}

impl TracingConfig {
    /// Pretty, colored output at `level`, no span events.
    pub fn new(level: Level) -> Self {
        Self {
            level,
            format: OutputFormat::Pretty,
            span_events: false,
            ansi: true,
        }
    }

    /// Settings for the level named in `[application] log_level`.
    pub fn from_config(config: &StsConfig) -> StsResult<Self> {
        let name = &config.application.log_level;
        let level = name.parse::<Level>().map_err(|_| {
            StsError::Configuration(format!("log level '{name}' is not a tracing level"))
        })?;
        Ok(Self::new(level))
    }

    /// Render with `format`.
    pub fn with_format(self, format: OutputFormat) -> Self {
        Self { format, ..self }
    }

    /// Emit span open/close events.
    pub fn with_span_events(self, span_events: bool) -> Self {
        Self { span_events, ..self }
    }

    /// Use colors in pretty output.
    pub fn with_ansi(self, ansi: bool) -> Self {
        Self { ansi, ..self }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::from_level(self.level).into())
            .from_env_lossy()
    }

    fn layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let spans = if self.span_events {
            FmtSpan::NEW | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };
        let base = fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(spans);
        match self.format {
            OutputFormat::Pretty => base.pretty().with_ansi(self.ansi).boxed(),
            OutputFormat::Compact => base.compact().with_ansi(false).boxed(),
            OutputFormat::Json => base.json().boxed(),
        }
    }
}

/// Install the global subscriber. A subscriber installed earlier (tests,
/// an embedding application) stays in place.
pub fn init(config: &TracingConfig) {
    let installed = tracing_subscriber::registry()
        .with(config.layer().with_filter(config.filter()))
        .try_init();
    if let Err(e) = installed {
        tracing::debug!(error = %e, "Keeping the existing subscriber");
    }
}
