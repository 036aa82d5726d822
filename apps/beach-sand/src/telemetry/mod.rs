use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

static PERF_ENABLED: Lazy<bool> = Lazy::new(|| env_truthy("BEACH_SAND_PERF").unwrap_or(false));

static STATS: Lazy<Mutex<HashMap<&'static str, PerfStat>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

const REPORT_EVERY: u64 = 200;

#[derive(Default, Clone, Copy, Debug)]
pub struct PerfStat {
    pub count: u64,
    pub total_ns: u128,
    pub max_ns: u128,
}

pub fn enabled() -> bool {
    *PERF_ENABLED
}

pub fn record_duration(label: &'static str, duration: Duration) {
    if !enabled() {
        return;
    }
    let mut stats = STATS.lock();
    let entry = stats.entry(label).or_default();
    entry.count += 1;
    let nanos = duration.as_nanos();
    entry.total_ns += nanos;
    entry.max_ns = entry.max_ns.max(nanos);
    if entry.count % REPORT_EVERY == 0 {
        report(label, entry);
    }
}

/// Current totals for `label`, if anything was recorded.
pub fn snapshot(label: &'static str) -> Option<PerfStat> {
    STATS.lock().get(label).copied()
}

fn report(label: &'static str, stat: &PerfStat) {
    let avg_us = (stat.total_ns / stat.count.max(1) as u128) as f64 / 1_000.0;
    let max_us = stat.max_ns as f64 / 1_000.0;
    debug!(
        target = "telemetry::perf",
        label,
        count = stat.count,
        avg_us,
        max_us,
        "perf sample"
    );
}

pub struct PerfGuard {
    label: &'static str,
    start: Instant,
}

impl PerfGuard {
    pub fn new(label: &'static str) -> Option<Self> {
        if !enabled() {
            return None;
        }
        Some(Self {
            label,
            start: Instant::now(),
        })
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        record_duration(self.label, self.start.elapsed());
    }
}

pub mod logging {
    use clap::ValueEnum;
    use std::fs::OpenOptions;
    use std::path::PathBuf;
    use std::sync::OnceLock;
    use tracing::level_filters::LevelFilter;
    use tracing_appender::non_blocking::WorkerGuard;
    use tracing_subscriber::EnvFilter;

    pub const FILTER_ENV: &str = "BEACH_SAND_LOG_FILTER";

    #[derive(Clone, Copy, Debug, Default, ValueEnum, PartialEq, Eq, PartialOrd, Ord)]
    pub enum LogLevel {
        Error,
        #[default]
        Warn,
        Info,
        Debug,
        Trace,
    }

    impl LogLevel {
        pub fn as_str(self) -> &'static str {
            match self {
                LogLevel::Error => "error",
                LogLevel::Warn => "warn",
                LogLevel::Info => "info",
                LogLevel::Debug => "debug",
                LogLevel::Trace => "trace",
            }
        }

        pub fn to_filter(self) -> LevelFilter {
            match self {
                LogLevel::Error => LevelFilter::ERROR,
                LogLevel::Warn => LevelFilter::WARN,
                LogLevel::Info => LevelFilter::INFO,
                LogLevel::Debug => LevelFilter::DEBUG,
                LogLevel::Trace => LevelFilter::TRACE,
            }
        }
    }

    /// Without a file, records are discarded: the terminal is busy showing
    /// the canvas and anything written to stderr would land on top of it.
    #[derive(Clone, Debug, Default)]
    pub struct LogConfig {
        pub level: LogLevel,
        pub file: Option<PathBuf>,
    }

    #[derive(thiserror::Error, Debug)]
    pub enum InitError {
        #[error("failed to open log file {path:?}: {source}")]
        Io {
            path: PathBuf,
            source: std::io::Error,
        },
        #[error("failed to configure logger: {0}")]
        Configure(String),
    }

    static INIT: OnceLock<()> = OnceLock::new();
    static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

    pub fn init(config: &LogConfig) -> Result<(), InitError> {
        if INIT.get().is_some() {
            return Ok(());
        }
        inner_init(config)?;
        INIT.set(()).ok();
        Ok(())
    }

    fn inner_init(config: &LogConfig) -> Result<(), InitError> {
        let env_filter = build_env_filter(config.level.to_filter());

        let (writer, guard) = match &config.file {
            Some(path) => {
                let file = OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .map_err(|source| InitError::Io {
                        path: path.clone(),
                        source,
                    })?;
                tracing_appender::non_blocking(file)
            }
            None => tracing_appender::non_blocking(std::io::sink()),
        };

        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_level(true)
            .with_target(config.level >= LogLevel::Debug)
            .with_thread_names(config.level >= LogLevel::Trace)
            .with_ansi(false)
            .with_writer(writer)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| InitError::Configure(err.to_string()))?;

        let _ = GUARD.set(guard);
        Ok(())
    }

    fn build_env_filter(level: LevelFilter) -> EnvFilter {
        if let Ok(filter) = std::env::var(FILTER_ENV) {
            return EnvFilter::new(filter);
        }
        EnvFilter::new(default_filter_for(level))
    }

    /// Every event from this crate is targeted at its module path.
    const OWN_TARGET: &str = "beach_sand";

    const TRACE_DEP_TARGETS: &[&str] = &["hyper", "reqwest", "rustls", "mio", "h2"];

    /// Our own targets follow the requested level; dependencies are held at
    /// `info` unless the caller asked for less.
    pub(crate) fn default_filter_for(level: LevelFilter) -> String {
        let own = match level {
            LevelFilter::TRACE => "trace",
            LevelFilter::DEBUG => "debug",
            LevelFilter::INFO => return "info".to_owned(),
            LevelFilter::WARN => return "warn".to_owned(),
            LevelFilter::ERROR => return "error".to_owned(),
            LevelFilter::OFF => return "off".to_owned(),
        };
        let mut filter = format!("info,{OWN_TARGET}={own}");
        if level == LevelFilter::TRACE && !super::env_truthy("BEACH_SAND_TRACE_DEPS").unwrap_or(false)
        {
            for target in TRACE_DEP_TARGETS {
                filter.push_str(&format!(",{target}=info"));
            }
        }
        filter
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn verbose_levels_only_apply_to_this_crate() {
            let filter = default_filter_for(LogLevel::Debug.to_filter());
            assert_eq!(filter, "info,beach_sand=debug");
            assert!(!filter.contains("reqwest"));
            filter.parse::<EnvFilter>().unwrap();
            assert_eq!(default_filter_for(LogLevel::Warn.to_filter()), "warn");
        }

        #[test]
        fn levels_are_ordered_by_verbosity() {
            assert!(LogLevel::Trace > LogLevel::Debug);
            assert!(LogLevel::Error < LogLevel::Warn);
            assert_eq!(LogLevel::default(), LogLevel::Warn);
            assert_eq!(LogLevel::Info.as_str(), "info");
        }
    }
}
