use std::fs::{File, OpenOptions};
use std::io::{self, Stdout, Write};

use slog::{o, Drain, Never, OwnedKVList, Record};

use crate::conf::logging::{Level, Log, To};
use crate::{MeqError, Result};

pub use slog::Logger;

/// Builds the root logger from `log` and routes the `log` facade into it.
pub fn logger_init(log: &Log) -> Result<Logger> {
    let logger = config_logger(log.filename(), log.to, log.level)?;
    log::set_boxed_logger(Box::new(LoggerEx(logger.clone())))
        .map_err(|e| MeqError::Msg(format!("logger init failed, {}", e)))?;
    log::set_max_level(slog_log_to_level(log.level.inner()).to_level_filter());
    Ok(logger)
}

struct LoggerEx(Logger);

impl log::Log for LoggerEx {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, r: &log::Record) {
        let level = log_to_slog_level(r.metadata().level());
        let args = r.args();
        let target = r.target();
        let location = &record_as_location(r);
        let s = slog::RecordStatic { location, level, tag: target };

        self.0.log(&Record::new(&s, args, slog::b!()))
    }

    fn flush(&self) {}
}

fn log_to_slog_level(level: log::Level) -> slog::Level {
    match level {
        log::Level::Trace => slog::Level::Trace,
        log::Level::Debug => slog::Level::Debug,
        log::Level::Info => slog::Level::Info,
        log::Level::Warn => slog::Level::Warning,
        log::Level::Error => slog::Level::Error,
    }
}

fn slog_log_to_level(level: slog::Level) -> log::Level {
    match level {
        slog::Level::Trace => log::Level::Trace,
        slog::Level::Debug => log::Level::Debug,
        slog::Level::Info => log::Level::Info,
        slog::Level::Warning => log::Level::Warn,
        slog::Level::Error | slog::Level::Critical => log::Level::Error,
    }
}

fn record_as_location(r: &log::Record) -> slog::RecordLocation {
    let module = r.module_path_static().unwrap_or("<unknown>");
    let file = r.file_static().unwrap_or("<unknown>");
    let line = r.line().unwrap_or_default();

    slog::RecordLocation { file, line, column: 0, function: "", module }
}

pub fn config_logger(filename: String, to: To, level: Level) -> Result<Logger> {
    let decorator = slog_term::PlainDecorator::new(WriteFilter::new(filename, to)?);
    let drain = slog_term::FullFormat::new(decorator)
        .use_custom_timestamp(|io: &mut dyn Write| {
            write!(io, "{}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        })
        .build()
        .fuse();

    let drain = LevelFilter { drain, level };

    let drain = slog_async::Async::new(drain)
        .chan_size(4096 * 4)
        .overflow_strategy(slog_async::OverflowStrategy::DropAndReport)
        .build()
        .fuse();

    Ok(Logger::root(drain, o!()))
}

struct LevelFilter<D> {
    drain: D,
    level: Level,
}

impl<D> Drain for LevelFilter<D>
where
    D: Drain<Ok = (), Err = Never>,
{
    type Ok = ();
    type Err = Never;

    fn log(&self, record: &Record, values: &OwnedKVList) -> std::result::Result<Self::Ok, Self::Err> {
        if record.level().is_at_least(self.level.inner()) {
            self.drain.log(record, values)
        } else {
            Ok(())
        }
    }
}

struct WriteFilter {
    to: To,
    file: Option<File>,
    console: Stdout,
}

impl WriteFilter {
    fn new(filename: String, to: To) -> Result<Self> {
        let file = if to.file() { Some(open_file(&filename)?) } else { None };
        Ok(Self { to, file, console: io::stdout() })
    }

    fn write_file(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(buf),
            None => Ok(buf.len()),
        }
    }
}

impl Write for WriteFilter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match self.to {
            To::Console => self.console.write(buf)?,
            To::File => self.write_file(buf)?,
            To::Both => {
                self.console.write_all(buf)?;
                self.write_file(buf)?
            }
            To::Off => buf.len(),
        };
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.to.console() {
            self.console.flush()?;
        }
        if let Some(f) = self.file.as_mut() {
            f.flush()?;
        }
        Ok(())
    }
}

fn open_file(filename: &str) -> Result<File> {
    OpenOptions::new().create(true).append(true).open(filename).map_err(|e| {
        MeqError::Msg(format!("logger file config error, filename: {}, {:?}", filename, e))
    })
}
