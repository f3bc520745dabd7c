//! Process logger setup and the per-component log sink.

use log::Level;
use std::{
    fmt,
    sync::{Arc, Mutex},
};

pub const ENV_FILTER: &str = "HANDCTL_LOG";

pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::new().filter_or(ENV_FILTER, "info"))
        .format_timestamp_millis()
        .init();
}

/// Records captured by a [`LogSink::capture`] sink.
pub type Captured = Arc<Mutex<Vec<(Level, String)>>>;

/// Handle a pipeline component logs through. Handed in at construction so
/// components never reach for process-wide logger state themselves.
#[derive(Debug, Clone)]
pub struct LogSink {
    target: &'static str,
    capture: Option<Captured>,
}

impl LogSink {
    pub fn new(target: &'static str) -> Self {
        Self {
            target,
            capture: None,
        }
    }

    /// In-memory sink; everything logged through it lands in the returned buffer.
    #[cfg(test)]
    pub fn capture(target: &'static str) -> (Self, Captured) {
        let buf: Captured = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                target,
                capture: Some(buf.clone()),
            },
            buf,
        )
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        match &self.capture {
            Some(buf) => {
                if let Ok(mut v) = buf.lock() {
                    v.push((level, args.to_string()));
                }
            }
            None => log::log!(target: self.target, level, "{args}"),
        }
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Info, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Trace, args);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_sink_records_level_and_message() {
        let (sink, buf) = LogSink::capture("handctl::test");
        sink.debug(format_args!("hello {}", 42));
        sink.info(format_args!("bye"));
        let v = buf.lock().unwrap();
        assert_eq!(v.len(), 2);
        assert_eq!(v[0], (Level::Debug, "hello 42".to_string()));
        assert_eq!(v[1].0, Level::Info);
    }
}
