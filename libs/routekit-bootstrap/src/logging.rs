use crate::config::LoggingConfig;
use std::io::IsTerminal;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};

// Keep a guard for the non-blocking console writer to avoid being dropped.
static CONSOLE_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

fn parse_tracing_level(s: &str) -> Option<Level> {
    match s.to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        "off" | "none" => None,
        _ => Some(Level::INFO),
    }
}

// ================= rotating writer for the log file =================

use file_rotate::{
    compression::Compression,
    suffix::{AppendTimestamp, FileLimit},
    ContentLimit, FileRotate,
};

#[derive(Clone)]
struct RotWriter(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl<'a> fmt::MakeWriter<'a> for RotWriter {
    type Writer = RotWriterHandle;
    fn make_writer(&'a self) -> Self::Writer {
        RotWriterHandle(self.0.clone())
    }
}

#[derive(Clone)]
struct RotWriterHandle(Arc<Mutex<FileRotate<AppendTimestamp>>>);

impl Write for RotWriterHandle {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().write(buf)
    }
    fn flush(&mut self) -> std::io::Result<()> {
        self.0.lock().unwrap().flush()
    }
}

fn resolve_log_path(file: &str, base_dir: &Path) -> PathBuf {
    let p = Path::new(file);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn create_rotating_writer(
    log_path: &Path,
    max_bytes: usize,
    max_backups: Option<usize>,
) -> std::io::Result<RotWriter> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let limit = match max_backups {
        Some(n) => FileLimit::MaxFiles(n),
        None => FileLimit::Age(chrono::Duration::days(7)),
    };
    let rot = FileRotate::new(
        log_path,
        AppendTimestamp::default(limit),
        ContentLimit::BytesSurpassed(max_bytes),
        Compression::None,
        None,
    );
    Ok(RotWriter(Arc::new(Mutex::new(rot))))
}

// ================= public init =================

/// Initialize logging: human-readable console output plus an optional
/// rotating JSON log file. Without a config section, falls back to INFO on
/// the console, honoring `RUST_LOG`.
pub fn init_logging(cfg: Option<&LoggingConfig>, base_dir: &Path) {
    // Bridge `log` → `tracing` *before* installing the subscriber.
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("LogTracer init skipped: {e}");
    }

    let Some(cfg) = cfg else {
        init_minimal();
        return;
    };

    let console_level = parse_tracing_level(&cfg.console_level)
        .map(LevelFilter::from_level)
        .unwrap_or(LevelFilter::OFF);
    let console_targets = Targets::new().with_default(console_level);

    let (console_writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let _ = CONSOLE_GUARD.set(guard);
    let console_layer = fmt::layer()
        .with_writer(console_writer)
        .with_ansi(std::io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_filter(console_targets);

    let file_layer = cfg.file.as_deref().and_then(|file| {
        let path = resolve_log_path(file, base_dir);
        let max_bytes = cfg.max_size_mb.unwrap_or(100) as usize * 1024 * 1024;
        match create_rotating_writer(&path, max_bytes, cfg.max_backups) {
            Ok(writer) => {
                let level = if cfg.file_level.is_empty() {
                    Some(Level::DEBUG)
                } else {
                    parse_tracing_level(&cfg.file_level)
                };
                let targets = Targets::new().with_default(
                    level.map(LevelFilter::from_level).unwrap_or(LevelFilter::OFF),
                );
                Some(
                    fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_ansi(false)
                        .with_timer(fmt::time::UtcTime::rfc_3339())
                        .with_filter(targets),
                )
            }
            Err(e) => {
                eprintln!("failed to open log file {}: {e}", path.display());
                None
            }
        }
    });

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .init();
}

fn init_minimal() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal())
                .with_timer(fmt::time::UtcTime::rfc_3339()),
        )
        .init();
}
