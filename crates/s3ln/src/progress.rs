//! 📊 progress.rs — "Are we there yet?" — every batch, every time, forever.
//!
//! 🚀 Lines per second, MiB per second, and how long we've been at it, drawn on stderr
//! with a spinner and a comfy table. We don't know how many lines a bucket holds until
//! we've read it, so there is no percentage and no ETA. Only vibes and throughput.
//!
//! ⚠️ Watching the spinner will not make it go faster. Science says no.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::NOTHING};
use indicatif::{ProgressBar, ProgressStyle};

use crate::common::BatchReport;

// -- 📏 one mebibyte. not a megabyte, pedants.
const MIB: f64 = 1024.0 * 1024.0;

// -- 🎨 redrawing the table for every single line would cost more than the line
const RENDER_INTERVAL: Duration = Duration::from_millis(100);

/// 🔢 "1000000" → "1,000,000". You're welcome, eyes.
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ MM:SS, or HH:MM:SS if you should probably call your mom.
fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

struct Rates {
    lines_per_sec: f64,
    mib_per_sec: f64,
}

/// 📊 Tracks bytes and lines written, and the rates over a sliding 5-second window.
pub struct ProgressMetrics {
    /// 🏷️ what are we reading? `s3://bucket/pattern`, usually
    source_name: String,
    objects_total: usize,
    total_bytes: u64,
    total_lines: u64,
    progress_bar: ProgressBar,
    rate_samples: VecDeque<(Instant, u64, u64)>,
    start_time: Instant,
    last_render: Option<Instant>,
}

impl std::fmt::Debug for ProgressMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ProgressMetrics")
            .field("source_name", &self.source_name)
            .field("objects_total", &self.objects_total)
            .field("total_bytes", &self.total_bytes)
            .field("total_lines", &self.total_lines)
            .finish()
    }
}

impl ProgressMetrics {
    /// 🚀 A live spinner on stderr, or a silent one when `visible` is false.
    pub fn new(source_name: String, objects_total: usize, visible: bool) -> Self {
        let progress_bar = if visible {
            let the_bar = ProgressBar::new_spinner();
            // -- 🐛 the template is a constant; if indicatif ever rejects it, plain spinner it is
            let the_style = ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner());
            the_bar.set_style(the_style);
            the_bar.enable_steady_tick(RENDER_INTERVAL);
            the_bar
        } else {
            ProgressBar::hidden()
        };

        let start_time = Instant::now();
        let mut rate_samples = VecDeque::new();
        rate_samples.push_back((start_time, 0u64, 0u64));

        Self {
            source_name,
            objects_total,
            total_bytes: 0,
            total_lines: 0,
            progress_bar,
            rate_samples,
            start_time,
            last_render: None,
        }
    }

    /// 🔄 Count one more write. Redraws at most every 100ms.
    pub fn update(&mut self, bytes_written: u64, lines_written: u64) {
        self.total_bytes += bytes_written;
        self.total_lines += lines_written;

        let now = Instant::now();
        let the_render_is_due = self
            .last_render
            .is_none_or(|last| now.duration_since(last) >= RENDER_INTERVAL);
        if the_render_is_due {
            self.last_render = Some(now);
            let rates = self.calculate_rates(now);
            self.render(rates);
        }
    }

    pub fn total_lines(&self) -> u64 {
        self.total_lines
    }

    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    /// ✅ Stop the spinner and clear it, so the summary table has the stage to itself.
    pub fn finish(&self) {
        self.progress_bar.finish_and_clear();
    }

    fn calculate_rates(&mut self, now: Instant) -> Rates {
        let window = Duration::from_secs(5);
        while let Some(&(timestamp, _, _)) = self.rate_samples.front() {
            if now.duration_since(timestamp) > window {
                self.rate_samples.pop_front();
            } else {
                break;
            }
        }
        self.rate_samples
            .push_back((now, self.total_bytes, self.total_lines));

        if let Some(&(oldest_time, oldest_bytes, oldest_lines)) = self.rate_samples.front() {
            let elapsed = now.duration_since(oldest_time).as_secs_f64();
            if elapsed > 0.0 {
                let bytes_delta = self.total_bytes.saturating_sub(oldest_bytes);
                let lines_delta = self.total_lines.saturating_sub(oldest_lines);
                return Rates {
                    lines_per_sec: lines_delta as f64 / elapsed,
                    mib_per_sec: (bytes_delta as f64 / elapsed) / MIB,
                };
            }
        }

        // -- 💤 not enough elapsed time yet
        Rates {
            lines_per_sec: 0.0,
            mib_per_sec: 0.0,
        }
    }

    fn render(&self, rates: Rates) {
        let mut table = Table::new();
        table.load_preset(NOTHING);
        table.set_content_arrangement(ContentArrangement::Dynamic);

        table.add_row(vec![
            Cell::new(format!("{} Lines/s", format_number(rates.lines_per_sec as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} Lines", format_number(self.total_lines)))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{:.2} MiB/s", rates.mib_per_sec)).set_alignment(CellAlignment::Right),
            Cell::new(format!("{:.2} MiB", self.total_bytes as f64 / MIB))
                .set_alignment(CellAlignment::Right),
        ]);
        table.add_row(vec![
            Cell::new(format!("{} objects", format_number(self.objects_total as u64)))
                .set_alignment(CellAlignment::Right),
            Cell::new(format!("{} elapsed", format_duration(self.start_time.elapsed())))
                .set_alignment(CellAlignment::Right),
        ]);

        self.progress_bar
            .set_message(format!("source: {}\n{}", self.source_name, table));
    }
}

/// 🍽️ The end-of-batch summary: what went in, what came out, how long it took.
pub fn render_summary(report: &BatchReport, elapsed: Duration) -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    let the_rows = [
        ("objects", format_number(report.objects_total as u64)),
        ("succeeded", format_number(report.objects_succeeded as u64)),
        ("failed", format_number(report.objects_failed as u64)),
        ("lines", format_number(report.lines_emitted)),
        ("elapsed", format_duration(elapsed)),
    ];
    for (label, value) in the_rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table
}
