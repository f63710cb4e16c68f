// Global logging system for the stub
//
// Pre-OS there is no console we can count on, so records land in a fixed
// ring of formatted lines that the driver can dump once output exists.

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

const MAX_LOG_ENTRIES: usize = 64;
const MAX_LINE_LEN: usize = 120;

/// One formatted log record, truncated to `MAX_LINE_LEN` bytes.
#[derive(Clone, Copy)]
pub struct LogLine {
    bytes: [u8; MAX_LINE_LEN],
    len: usize,
}

impl LogLine {
    const EMPTY: Self = Self {
        bytes: [0; MAX_LINE_LEN],
        len: 0,
    };

    pub fn as_str(&self) -> &str {
        // write_str only ever stops on a char boundary
        core::str::from_utf8(&self.bytes[..self.len]).unwrap_or("")
    }
}

impl Write for LogLine {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = MAX_LINE_LEN - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }
        self.bytes[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;
        Ok(())
    }
}

struct LogRing {
    lines: [LogLine; MAX_LOG_ENTRIES],
    next: usize,
    total: usize,
}

impl LogRing {
    const fn new() -> Self {
        Self {
            lines: [LogLine::EMPTY; MAX_LOG_ENTRIES],
            next: 0,
            total: 0,
        }
    }

    fn push(&mut self, line: LogLine) {
        self.lines[self.next] = line;
        self.next = (self.next + 1) % MAX_LOG_ENTRIES;
        self.total += 1;
    }

    fn len(&self) -> usize {
        self.total.min(MAX_LOG_ENTRIES)
    }

    /// Oldest first.
    fn for_each(&self, mut f: impl FnMut(&str)) {
        let count = self.len();
        let start = if self.total > MAX_LOG_ENTRIES { self.next } else { 0 };
        for i in 0..count {
            f(self.lines[(start + i) % MAX_LOG_ENTRIES].as_str());
        }
    }

    fn clear(&mut self) {
        self.next = 0;
        self.total = 0;
    }
}

static LOG_RING: Mutex<LogRing> = Mutex::new(LogRing::new());
static LOGGER: RingLogger = RingLogger;

/// `log` sink that records into the global ring.
pub struct RingLogger;

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let mut line = LogLine::EMPTY;
        let _ = write!(line, "[{}] {}", record.level(), record.args());
        LOG_RING.lock().push(line);
    }

    fn flush(&self) {}
}

/// Install the ring logger as the global `log` sink.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Visit the retained lines, oldest first.
pub fn get_logs(f: impl FnMut(&str)) {
    LOG_RING.lock().for_each(f);
}

pub fn log_count() -> usize {
    LOG_RING.lock().len()
}

/// Records pushed out of the ring since the last `clear`.
pub fn dropped_count() -> usize {
    let ring = LOG_RING.lock();
    ring.total - ring.len()
}

pub fn clear() {
    LOG_RING.lock().clear();
}
