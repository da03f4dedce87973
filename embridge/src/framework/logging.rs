use env_logger::{Builder, Env};
use log::{Level, Record};
use std::io::{self, Write};
use std::thread;
use termcolor::{BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

pub use log::{debug, error, info, trace, warn};

pub const DEFAULT_FILTER: &str = "embridge=info";

/// Installs the coloured `[LEVEL][module] message` logger. Safe to call more
/// than once; only the first call wins. `RUST_LOG` overrides
/// [`DEFAULT_FILTER`].
pub fn init_logger() {
    init_logger_with_filter(DEFAULT_FILTER);
}

/// Same as [`init_logger`] with a caller-chosen default filter, usually
/// `RunLoopConfig::log_filter`.
pub fn init_logger_with_filter(default_filter: &str) {
    let mut builder =
        Builder::from_env(Env::default().default_filter_or(default_filter));

    builder.format(|_buf, record| {
        let writer = BufferWriter::stderr(ColorChoice::Auto);
        let mut buffer = writer.buffer();
        write_record(&mut buffer, record, thread::current().name())?;
        writer.print(&buffer)
    });

    let _ = builder.try_init();
}

fn level_color(level: Level) -> Color {
    match level {
        Level::Trace => Color::Cyan,
        Level::Debug => Color::Blue,
        Level::Info => Color::Green,
        Level::Warn => Color::Yellow,
        Level::Error => Color::Red,
    }
}

/// `embridge::bridge::channels` reads as `bridge::channels`.
fn short_module(module_path: &str) -> &str {
    module_path
        .strip_prefix("embridge::")
        .unwrap_or(module_path)
}

// Engine callbacks arrive on engine threads, so anything off the main
// thread is tagged with its thread name.
fn write_record(
    out: &mut impl WriteColor,
    record: &Record<'_>,
    thread_name: Option<&str>,
) -> io::Result<()> {
    let mut color = ColorSpec::new();
    color.set_fg(Some(level_color(record.level())));

    out.set_color(&color)?;
    let module_path = record.module_path().unwrap_or("<unknown>");
    write!(out, "[{}][{}]", record.level(), short_module(module_path))?;
    out.reset()?;

    match thread_name {
        Some("main") => {}
        Some(name) => write!(out, "[{}]", name)?,
        None => write!(out, "[{:?}]", thread::current().id())?,
    }

    writeln!(out, " {}", record.args())
}
