//! Tracing subscriber setup for the CLI host
//!
//! The library only emits events (`tracing` and `log`); the host decides
//! where they go. `log` records from the backends are forwarded through the
//! subscriber's log bridge.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Output format for tracing events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TracingFormat {
    /// Human-readable console output with colors
    #[default]
    Console,
    /// Plain output for CI logs
    Compact,
    /// One JSON object per event
    #[cfg(feature = "tracing-json")]
    Json,
}

#[derive(Debug, Default)]
pub struct TracingConfig {
    /// 0 = info, 1 = debug, 2+ = trace
    pub verbosity: u8,
    pub format: TracingFormat,
    /// Overrides `verbosity` when set
    pub env_filter: Option<String>,
    /// Attached to the root span for correlating a run's events
    pub session_id: Option<String>,
}

impl TracingConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_verbosity(mut self, verbosity: u8) -> Self {
        self.verbosity = verbosity;
        self
    }

    #[must_use]
    pub fn with_format(mut self, format: TracingFormat) -> Self {
        self.format = format;
        self
    }

    #[must_use]
    pub fn with_env_filter<S: Into<String>>(mut self, filter: S) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    #[must_use]
    pub fn with_session_id<S: Into<String>>(mut self, session_id: S) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn verbosity_to_filter(&self) -> &'static str {
        match self.verbosity {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }

    fn filter(&self) -> anyhow::Result<EnvFilter> {
        let directive = self
            .env_filter
            .as_deref()
            .unwrap_or_else(|| self.verbosity_to_filter());
        Ok(EnvFilter::try_new(directive)?)
    }

    /// Install the global subscriber
    ///
    /// # Errors
    /// - Invalid filter directive or a subscriber is already installed
    pub fn init(self) -> anyhow::Result<()> {
        let registry = Registry::default().with(self.filter()?);

        match self.format {
            TracingFormat::Console => {
                let layer = fmt::layer()
                    .with_ansi(true)
                    .with_target(false)
                    .with_level(true)
                    .compact();
                registry.with(layer).try_init()?;
            },
            TracingFormat::Compact => {
                let layer = fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .compact();
                registry.with(layer).try_init()?;
            },
            #[cfg(feature = "tracing-json")]
            TracingFormat::Json => {
                let layer = fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false);
                registry.with(layer).try_init()?;
            },
        }

        if let Some(session_id) = &self.session_id {
            tracing::debug!(session_id = %session_id, "Tracing initialized");
        }
        Ok(())
    }
}

/// Initialize tracing for CLI usage from `-v` flags
///
/// # Errors
/// - A subscriber is already installed
pub fn init_cli_tracing(verbosity: u8, session_id: Option<String>) -> anyhow::Result<()> {
    let mut config = TracingConfig::new().with_verbosity(verbosity);
    if let Ok(filter) = std::env::var("RUST_LOG") {
        config = config.with_env_filter(filter);
    }
    if let Some(id) = session_id {
        config = config.with_session_id(id);
    }
    config.init()
}
