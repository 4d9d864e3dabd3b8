//! Switchable diagnostic sink.
//!
//! Outside debug mode the daemon logs to syslog; after a successful login
//! the sink moves to an append-only `.interlock.log` on the encrypted
//! volume, and back to syslog before the volume is unmounted again. Debug
//! mode stays on stderr with file:line locations throughout.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::{Arc, Mutex};

use syslog::{Facility, Formatter3164};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

use interlock_core::{Error, Result};

/// Log file appended inside the mounted volume after authentication.
const LOG_FILE: &str = ".interlock.log";

enum Sink {
    Stderr,
    File(std::fs::File),
    Syslog(Box<syslog::Logger<syslog::LoggerBackend, Formatter3164>>),
}

#[derive(Clone)]
pub struct LogSwitch {
    sink: Arc<Mutex<Sink>>,
}

impl LogSwitch {
    pub fn new() -> Self {
        Self {
            sink: Arc::new(Mutex::new(Sink::Stderr)),
        }
    }

    pub fn enable_stderr(&self) {
        *self.sink.lock().unwrap() = Sink::Stderr;
    }

    pub fn enable_syslog(&self) -> Result<()> {
        let formatter = Formatter3164 {
            facility: Facility::LOG_USER,
            hostname: None,
            process: "interlock".into(),
            pid: 0,
        };

        let logger = syslog::unix(formatter)
            .map_err(|e| Error::Other(format!("cannot switch to syslog: {e}")))?;

        *self.sink.lock().unwrap() = Sink::Syslog(Box::new(logger));

        Ok(())
    }

    /// Append to `.interlock.log` (0600) on the mounted volume.
    pub fn enable_file(&self, mount_point: &Path) -> Result<()> {
        let path = mount_point.join(LOG_FILE);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(0o600)
            .open(&path)
            .map_err(|e| Error::Other(format!("could not switch to log file {}: {e}", path.display())))?;

        tracing::info!("switching to log file {}", path.display());

        *self.sink.lock().unwrap() = Sink::File(file);

        Ok(())
    }

    pub fn writer(&self) -> SwitchWriter {
        SwitchWriter {
            sink: self.sink.clone(),
        }
    }
}

impl Default for LogSwitch {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct SwitchWriter {
    sink: Arc<Mutex<Sink>>,
}

impl Write for SwitchWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut *self.sink.lock().unwrap() {
            Sink::Stderr => io::stderr().write(buf),
            Sink::File(file) => file.write(buf),
            Sink::Syslog(logger) => {
                let message = String::from_utf8_lossy(buf);
                let message = message.trim_end();

                if !message.is_empty() {
                    let _ = logger.info(message.to_string());
                }

                Ok(buf.len())
            }
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut *self.sink.lock().unwrap() {
            Sink::Stderr => io::stderr().flush(),
            Sink::File(file) => file.flush(),
            Sink::Syslog(_) => Ok(()),
        }
    }
}

impl<'a> MakeWriter<'a> for SwitchWriter {
    type Writer = SwitchWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

/// Install the global subscriber backed by the switchable sink.
pub fn init(debug: bool) -> LogSwitch {
    let switch = LogSwitch::new();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(switch.writer());

    if debug {
        builder.with_file(true).with_line_number(true).init();
    } else {
        builder.with_target(false).init();
    }

    switch
}
