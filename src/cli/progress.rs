//! Terminal progress line
//!
//! Renders `DownloadProgress` snapshots as a single refreshing line.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use crate::download::DownloadProgress;

const BAR_WIDTH: usize = 30;

/// Human readable byte count
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;

    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    format!("{:.2} {}", size, UNITS[unit])
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Time left at the given rate, if it can be estimated
pub fn estimate_remaining(remaining_bytes: u64, bytes_per_sec: f64) -> Option<Duration> {
    if bytes_per_sec <= 0.0 || remaining_bytes == 0 {
        return None;
    }
    Some(Duration::from_secs_f64(remaining_bytes as f64 / bytes_per_sec))
}

/// Progress line writer for stdout
pub struct ProgressDisplay {
    start_time: Instant,
    last_sample: Option<(Instant, u64)>,
    speed: f64,
    quiet: bool,
}

impl ProgressDisplay {
    pub fn new(quiet: bool) -> Self {
        Self {
            start_time: Instant::now(),
            last_sample: None,
            speed: 0.0,
            quiet,
        }
    }

    /// Redraw the line from a fresh snapshot
    pub fn update(&mut self, progress: &DownloadProgress) -> io::Result<()> {
        self.sample(progress.downloaded_bytes);
        if self.quiet {
            return Ok(());
        }

        let mut stdout = io::stdout().lock();
        write!(stdout, "\r\x1b[2K{}", self.render(progress))?;
        stdout.flush()
    }

    fn sample(&mut self, downloaded: u64) {
        let now = Instant::now();
        if let Some((at, bytes)) = self.last_sample {
            let elapsed = now.duration_since(at).as_secs_f64();
            if elapsed > 0.0 {
                self.speed = downloaded.saturating_sub(bytes) as f64 / elapsed;
            }
        }
        self.last_sample = Some((now, downloaded));
    }

    /// Download rate over the last two snapshots, in bytes per second
    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn render(&self, progress: &DownloadProgress) -> String {
        let filled = ((progress.fraction() * BAR_WIDTH as f64) as usize).min(BAR_WIDTH);
        let bar = "=".repeat(filled) + &" ".repeat(BAR_WIDTH - filled);

        let remaining = progress.total_bytes.saturating_sub(progress.downloaded_bytes);
        let eta = estimate_remaining(remaining, self.speed)
            .map(format_duration)
            .unwrap_or_else(|| "-".to_string());

        format!(
            "[{}] {:.1}% | {}/{} pieces | {} / {} | {}/s | peers {} | ETA {}",
            bar,
            progress.fraction() * 100.0,
            progress.completed_pieces,
            progress.total_pieces,
            format_bytes(progress.downloaded_bytes),
            format_bytes(progress.total_bytes),
            format_bytes(self.speed as u64),
            progress.active_peers,
            eta,
        )
    }

    pub fn print_status(&self, message: &str) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        println!("\r\x1b[2K{}", message);
        Ok(())
    }

    pub fn print_complete(&self, progress: &DownloadProgress) -> io::Result<()> {
        if self.quiet {
            return Ok(());
        }

        println!("\r\x1b[2K");
        println!("Download Complete!");
        println!("  Downloaded: {}", format_bytes(progress.downloaded_bytes));
        println!("  Peers used: {}", progress.connected_peers);
        println!("  Failed piece attempts: {}", progress.failed_attempts);
        println!("  Elapsed Time: {}", format_duration(self.elapsed()));
        Ok(())
    }

    /// Errors are printed even in quiet mode
    pub fn print_error(&self, message: &str) -> io::Result<()> {
        eprintln!("\r\x1b[2KError: {}", message);
        Ok(())
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 / 2), "1.50 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(30)), "30s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m 30s");
        assert_eq!(format_duration(Duration::from_secs(3661)), "1h 1m 1s");
    }

    #[test]
    fn test_estimate_remaining() {
        assert_eq!(estimate_remaining(50, 10.0), Some(Duration::from_secs(5)));
        assert_eq!(estimate_remaining(0, 10.0), None);
        assert_eq!(estimate_remaining(50, 0.0), None);
    }

    #[test]
    fn test_render_half_done() {
        let display = ProgressDisplay::new(true);
        let progress = DownloadProgress {
            completed_pieces: 1,
            total_pieces: 2,
            active_peers: 3,
            downloaded_bytes: 1024,
            total_bytes: 2048,
            ..Default::default()
        };

        let line = display.render(&progress);
        assert!(line.starts_with(&format!("[{}{}]", "=".repeat(15), " ".repeat(15))));
        assert!(line.contains("50.0%"));
        assert!(line.contains("1/2 pieces"));
        assert!(line.contains("peers 3"));
        assert!(line.ends_with("ETA -"));
    }

    #[test]
    fn test_speed_from_samples() {
        let mut display = ProgressDisplay::new(true);
        display.update(&DownloadProgress::default()).unwrap();
        assert_eq!(display.speed(), 0.0);

        std::thread::sleep(Duration::from_millis(20));
        let progress = DownloadProgress { downloaded_bytes: 4096, ..Default::default() };
        display.update(&progress).unwrap();
        assert!(display.speed() > 0.0);
    }
}
