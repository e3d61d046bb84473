//! Process-wide relay byte counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes relayed in each direction
///
/// `read` counts bytes received from clients (after decompression),
/// `written` counts bytes forwarded to clients (before compression).
#[derive(Debug, Default)]
pub struct ByteCounters {
    read: AtomicU64,
    written: AtomicU64,
}

impl ByteCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record bytes read from a client
    pub fn add_read(&self, bytes: usize) {
        self.read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Record bytes written to a client
    pub fn add_written(&self, bytes: usize) {
        self.written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            read: self.read.load(Ordering::Relaxed),
            written: self.written.load(Ordering::Relaxed),
        }
    }
}

/// Counter values at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub read: u64,
    pub written: u64,
}

impl CounterSnapshot {
    /// Plain-text rendering from the server's point of view
    ///
    /// Clients download what the server writes and upload what it reads.
    pub fn render(&self) -> String {
        format!(
            "download {} upload {}",
            format_bytes(self.written),
            format_bytes(self.read)
        )
    }
}

/// Human-readable byte count with two decimals above 1 KB
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    match bytes {
        b if b >= GB => format!("{:.2}GB", b as f64 / GB as f64),
        b if b >= MB => format!("{:.2}MB", b as f64 / MB as f64),
        b if b >= KB => format!("{:.2}KB", b as f64 / KB as f64),
        b => format!("{}B", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let counters = ByteCounters::new();
        counters.add_read(100);
        counters.add_read(20);
        counters.add_written(7);

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.read, 120);
        assert_eq!(snapshot.written, 7);
    }

    #[test]
    fn test_concurrent_increments() {
        let counters = Arc::new(ByteCounters::new());

        std::thread::scope(|scope| {
            for _ in 0..8 {
                let counters = counters.clone();
                scope.spawn(move || {
                    for _ in 0..1000 {
                        counters.add_read(1);
                        counters.add_written(2);
                    }
                });
            }
        });

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.read, 8000);
        assert_eq!(snapshot.written, 16000);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0B");
        assert_eq!(format_bytes(1023), "1023B");
        assert_eq!(format_bytes(1536), "1.50KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.00GB");
    }

    #[test]
    fn test_render() {
        let snapshot = CounterSnapshot {
            read: 2048,
            written: 10,
        };
        assert_eq!(snapshot.render(), "download 10B upload 2.00KB");
    }
}
