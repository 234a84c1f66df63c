//! Kernel `log` backend.
//!
//! Messages are buffered in memory until the console driver registers its
//! output function, then flushed once and written straight through.

use conquer_once::spin::OnceCell;
use core::fmt::{self, Write};
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

const BUFFER_SIZE: usize = 8192;

/// Console output function provided by the UART driver.
pub type ConsoleSink = fn(&str);

static CONSOLE_SINK: OnceCell<ConsoleSink> = OnceCell::uninit();

/// Buffer for storing log messages before the console is registered
struct LogBuffer {
    buffer: [u8; BUFFER_SIZE],
    position: usize,
}

impl LogBuffer {
    const fn new() -> Self {
        Self {
            buffer: [0; BUFFER_SIZE],
            position: 0,
        }
    }

    fn push_str(&mut self, s: &str) -> fmt::Result {
        let bytes = s.as_bytes();
        let remaining = BUFFER_SIZE - self.position;

        if bytes.len() > remaining {
            // Buffer is full; keep what we already have
            return Ok(());
        }

        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();

        Ok(())
    }

    fn contents(&self) -> &str {
        core::str::from_utf8(&self.buffer[..self.position]).unwrap_or("<invalid UTF-8>")
    }

    fn clear(&mut self) {
        self.position = 0;
    }
}

impl Write for LogBuffer {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        self.push_str(s)
    }
}

/// Adapter so `write!` can target the console function.
struct SinkWriter(ConsoleSink);

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        (self.0)(s);
        Ok(())
    }
}

/// State of the logger
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum LoggerState {
    /// Buffering messages until the console is ready
    Buffering,
    /// Console registered, buffer flushed, writing straight through
    ConsoleReady,
}

pub struct KernelLogger {
    buffer: Mutex<LogBuffer>,
    state: Mutex<LoggerState>,
}

impl KernelLogger {
    const fn new() -> Self {
        KernelLogger {
            buffer: Mutex::new(LogBuffer::new()),
            state: Mutex::new(LoggerState::Buffering),
        }
    }

    /// Register the console and flush everything buffered so far.
    pub fn console_ready(&self, sink: ConsoleSink) {
        let sink = *CONSOLE_SINK.get_or_init(|| sink);
        let mut state = self.state.lock();
        let mut buffer = self.buffer.lock();

        if buffer.position > 0 {
            sink("=== Buffered Boot Messages ===\n");
            sink(buffer.contents());
            sink("=== End Buffered Messages ===\n");
            buffer.clear();
        }

        *state = LoggerState::ConsoleReady;
    }
}

impl Log for KernelLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // try_lock: a log call must never spin on a lock held by the code it interrupted
        let state = match self.state.try_lock() {
            Some(state) => *state,
            None => return,
        };

        match state {
            LoggerState::Buffering => {
                if let Some(mut buffer) = self.buffer.try_lock() {
                    let _ = writeln!(
                        &mut *buffer,
                        "[{:>5}] {}: {}",
                        record.level(),
                        record.target(),
                        record.args()
                    );
                }
            }
            LoggerState::ConsoleReady => {
                if let Some(sink) = CONSOLE_SINK.get() {
                    let _ = writeln!(
                        SinkWriter(*sink),
                        "[{:>5}] {}: {}",
                        record.level(),
                        record.target(),
                        record.args()
                    );
                }
            }
        }
    }

    fn flush(&self) {}
}

pub static KERNEL_LOGGER: KernelLogger = KernelLogger::new();

/// Install the kernel logger. Can be called before the console exists.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&KERNEL_LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Call after the UART is initialized
pub fn console_ready(sink: ConsoleSink) {
    KERNEL_LOGGER.console_ready(sink);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_drops_when_full() {
        let mut buffer = LogBuffer::new();
        let chunk = "x".repeat(BUFFER_SIZE - 4);
        buffer.push_str(&chunk).unwrap();
        buffer.push_str("too long").unwrap();
        assert_eq!(buffer.position, BUFFER_SIZE - 4);
        buffer.push_str("abcd").unwrap();
        assert_eq!(buffer.position, BUFFER_SIZE);
    }

    #[test]
    fn test_buffer_formats_records() {
        let mut buffer = LogBuffer::new();
        write!(&mut buffer, "[{:>5}] {}: {}", log::Level::Info, "usb", "hello").unwrap();
        assert_eq!(buffer.contents(), "[ INFO] usb: hello");
        buffer.clear();
        assert_eq!(buffer.contents(), "");
    }
}
