//! Logging
//!
//! `cinderd` logs to stdout and to daily rotated files, each output has its own level
//! filter which can be changed while running.
use std::{fmt, mem::forget, sync::OnceLock};

use tracing::{level_filters::LevelFilter, subscriber::Interest, Metadata};
use tracing_appender::{non_blocking::NonBlocking, rolling::Rotation};
use tracing_subscriber::{
    filter::Filtered,
    fmt::{
        format::{DefaultFields, Format},
        Layer as FmtLayer,
    },
    layer::{Context, Filter, Layered, SubscriberExt},
    reload::{self, Handle},
    util::SubscriberInitExt,
    Layer, Registry,
};

use cinder_helper::fs::logs_path;

use crate::config::Config;

/// The file layer's filter, the file layer sits directly on the [`Registry`].
static FILE_WRITER_FILTER_HANDLE: OnceLock<Handle<CinderTracingFilter, Registry>> =
    OnceLock::new();

/// The stdout layer's filter, the stdout layer sits on top of the file layer.
static STDOUT_FILTER_HANDLE: OnceLock<
    Handle<
        CinderTracingFilter,
        Layered<
            Filtered<
                FmtLayer<Registry, DefaultFields, Format, NonBlocking>,
                reload::Layer<CinderTracingFilter, Registry>,
                Registry,
            >,
            Registry,
            Registry,
        >,
    >,
> = OnceLock::new();

/// A reloadable level filter.
pub struct CinderTracingFilter {
    pub level: LevelFilter,
}

impl fmt::Display for CinderTracingFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level: {}", self.level)
    }
}

impl<S> Filter<S> for CinderTracingFilter {
    fn enabled(&self, meta: &Metadata<'_>, cx: &Context<'_, S>) -> bool {
        Filter::<S>::enabled(&self.level, meta, cx)
    }

    fn callsite_enabled(&self, meta: &'static Metadata<'static>) -> Interest {
        Filter::<S>::callsite_enabled(&self.level, meta)
    }

    fn max_level_hint(&self) -> Option<LevelFilter> {
        Some(self.level)
    }
}

/// Installs the global subscriber.
///
/// # Errors
/// Fails if the log directory can not be created.
pub fn init_logging(config: &Config) -> anyhow::Result<()> {
    let (stdout_filter, stdout_handle) = reload::Layer::new(CinderTracingFilter {
        level: config.tracing.stdout.level,
    });
    drop(STDOUT_FILTER_HANDLE.set(stdout_handle));

    let stdout_layer = FmtLayer::default()
        .with_target(false)
        .with_filter(stdout_filter);

    let appender_config = &config.tracing.file;
    let (appender, guard) = tracing_appender::non_blocking(
        tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix("cinderd")
            .filename_suffix("log")
            .max_log_files(appender_config.max_log_files)
            .build(logs_path(&config.fs.data_directory, config.network()))?,
    );

    // The writer thread has to outlive every log call.
    forget(guard);

    let (appender_filter, appender_handle) = reload::Layer::new(CinderTracingFilter {
        level: appender_config.level,
    });
    drop(FILE_WRITER_FILTER_HANDLE.set(appender_handle));

    let appender_layer = FmtLayer::default()
        .with_target(false)
        .with_ansi(false)
        .with_writer(appender)
        .with_filter(appender_filter);

    tracing_subscriber::registry()
        .with(appender_layer)
        .with(stdout_layer)
        .try_init()?;

    Ok(())
}

/// Modifies the stdout filter, returns `false` if logging was not initialized.
pub fn modify_stdout_output(f: impl FnOnce(&mut CinderTracingFilter)) -> bool {
    STDOUT_FILTER_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(f).is_ok())
}

/// Modifies the file filter, returns `false` if logging was not initialized.
pub fn modify_file_output(f: impl FnOnce(&mut CinderTracingFilter)) -> bool {
    FILE_WRITER_FILTER_HANDLE
        .get()
        .is_some_and(|handle| handle.modify(f).is_ok())
}

/// Prints `s` to stderr in red.
pub fn eprintln_red(s: &str) {
    eprintln!("{}", nu_ansi_term::Color::Red.bold().paint(s));
}
