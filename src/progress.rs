//! Transfer progress reporting

use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Read};

/// Reader stage that tallies bytes pulled through it and advances a progress bar
pub struct CountingReader<R> {
    inner: R,
    bytes_read: u64,
    bar: ProgressBar,
}

impl<R: Read> CountingReader<R> {
    pub fn new(inner: R, bar: ProgressBar) -> Self {
        CountingReader {
            inner,
            bytes_read: 0,
            bar,
        }
    }

    /// Bytes read so far
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.bytes_read += n as u64;
        self.bar.inc(n as u64);
        Ok(n)
    }
}

/// Byte-sized progress bar drawn on stderr
pub fn transfer_bar(total: u64) -> ProgressBar {
    let pb = ProgressBar::new(total);
    if let Ok(style) = ProgressStyle::with_template(
        "[{bar:40.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {eta}",
    ) {
        pb.set_style(style.progress_chars("=>-"));
    }
    pb
}

/// Format a byte count in IEC (binary) units, e.g. `1.5 KiB`
pub fn byte_count_iec(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    let prefix = b"KMGTPE"[exp] as char;
    format!("{:.1} {}iB", bytes as f64 / div as f64, prefix)
}
