//! Custom logging formatter with hostname and rank prefix, no ANSI colors
//!
//! This module provides a custom tracing formatter that:
//! - Adds a `[hostname:rank]` prefix to each log line
//! - Removes ANSI color codes so per-rank output can be merged
//! - Shows span hierarchy with tab indentation
//! - Includes file location and line numbers

use std::fmt;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

fn hostname() -> String {
    gethostname::gethostname()
        .to_str()
        .unwrap_or("unknown")
        .to_string()
}

/// Custom event formatter with hostname and rank prefix
pub struct RankFormatter {
    prefix: String,
}

impl RankFormatter {
    pub fn new(rank: u32) -> Self {
        Self {
            prefix: format!("{}:{}", hostname(), rank),
        }
    }
}

impl<S, N> FormatEvent<S, N> for RankFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();

        let now = std::time::SystemTime::now();
        let datetime: chrono::DateTime<chrono::Utc> = now.into();

        write!(writer, "[{}] ", self.prefix)?;
        write!(writer, "{} ", datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ"))?;
        write!(writer, "{:5} ", meta.level())?;

        // Span context, one line per span with increasing indentation
        if let Some(scope) = ctx.event_scope() {
            let spans: Vec<_> = scope.from_root().collect();

            for (depth, span) in spans.iter().enumerate() {
                writeln!(writer)?;
                for _ in 0..=depth {
                    write!(writer, "\t")?;
                }

                write!(writer, "{}", span.name())?;

                let ext = span.extensions();
                if let Some(fields) = ext.get::<tracing_subscriber::fmt::FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{}}}", fields)?;
                    }
                }
            }

            writeln!(writer)?;
            for _ in 0..=spans.len() {
                write!(writer, "\t")?;
            }
        }

        write!(writer, "{}", meta.target())?;
        if let Some(file) = meta.file() {
            if let Some(line) = meta.line() {
                write!(writer, ":{}:{}", file, line)?;
            }
        }

        write!(writer, ": ")?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;

        writeln!(writer)
    }
}

/// Log level for `rank`: rank 0 uses `level`, all other ranks only warn
///
/// Setting `PLFSDIR_BENCH_LOG_ALL_RANKS=1` applies `level` to every rank.
pub fn rank_log_level(level: &str, rank: u32) -> &str {
    if rank == 0 || crate::constants::is_env_truthy("PLFSDIR_BENCH_LOG_ALL_RANKS") {
        level
    } else {
        "warn"
    }
}

/// Initialize tracing with the rank formatter
pub fn init_with_rank(level: &str, rank: u32) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .event_format(RankFormatter::new(rank))
        .with_writer(std::io::stdout);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    tracing::debug!("Logging initialized on host: {}", hostname());
}

/// Chrome tracing guard
///
/// The trace file is flushed when this guard is dropped, so it must be kept
/// alive until the run is over.
pub struct ChromeTraceGuard {
    _guard: tracing_chrome::FlushGuard,
}

/// Initialize tracing with rank-prefixed console output plus a Chrome trace
/// file (viewable in Perfetto UI)
///
/// # Arguments
/// * `level` - Log level filter (e.g., "info", "debug", "trace")
/// * `rank` - Rank printed in every console line
/// * `trace_path` - Path to the output trace file (.json extension recommended)
pub fn init_with_chrome_trace(
    level: &str,
    rank: u32,
    trace_path: &std::path::Path,
) -> ChromeTraceGuard {
    use tracing_subscriber::fmt;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = fmt::layer()
        .event_format(RankFormatter::new(rank))
        .with_writer(std::io::stdout);

    let (chrome_layer, guard) = tracing_chrome::ChromeLayerBuilder::new()
        .file(trace_path)
        .include_args(true)
        .build();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .with(chrome_layer)
        .init();

    tracing::debug!(
        "Logging initialized on host: {} with Chrome trace output: {}",
        hostname(),
        trace_path.display()
    );

    ChromeTraceGuard { _guard: guard }
}

/// Per-rank trace file name: `trace.json` becomes `trace.<rank>.json`
pub fn rank_trace_path(path: &std::path::Path, rank: u32) -> std::path::PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "trace".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, rank, ext.to_string_lossy()),
        None => format!("{}.{}", stem, rank),
    };
    path.with_file_name(name)
}
