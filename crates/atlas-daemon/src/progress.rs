//! Console rendering of download progress.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use atlas_assets::DownloadProgress;

const BAR_TEMPLATE: &str =
    "{msg:.bold} [{bar:30.cyan/blue}] {bytes}/{total_bytes} {bytes_per_sec} {eta}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {msg:.bold} {bytes} {bytes_per_sec}";

fn bar_style(total_known: bool) -> ProgressStyle {
    if total_known {
        ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    } else {
        ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
    }
}

/// One progress bar per artifact; a new file name finishes the previous bar.
pub struct DownloadBars {
    target: fn() -> ProgressDrawTarget,
    current: Option<(String, ProgressBar)>,
}

impl DownloadBars {
    pub fn stderr() -> Self {
        Self {
            target: ProgressDrawTarget::stderr,
            current: None,
        }
    }

    #[cfg(test)]
    fn hidden() -> Self {
        Self {
            target: ProgressDrawTarget::hidden,
            current: None,
        }
    }

    fn bar_for(&mut self, progress: &DownloadProgress) -> &ProgressBar {
        if matches!(&self.current, Some((name, _)) if *name != progress.file_name) {
            if let Some((_, previous)) = self.current.take() {
                previous.finish();
            }
        }
        let target = self.target;
        let (_, bar) = self.current.get_or_insert_with(|| {
            let bar = ProgressBar::with_draw_target(progress.total_bytes, target());
            bar.set_style(bar_style(progress.total_bytes.is_some()));
            bar.set_message(progress.file_name.clone());
            (progress.file_name.clone(), bar)
        });
        bar
    }

    /// Apply one update from the download engine.
    pub fn update(&mut self, progress: &DownloadProgress) {
        let bar = self.bar_for(progress);
        if let Some(total) = progress.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(progress.bytes_received);
        if progress.total_bytes == Some(progress.bytes_received) {
            bar.finish();
        }
    }
}

impl Drop for DownloadBars {
    fn drop(&mut self) {
        if let Some((_, bar)) = self.current.take() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

/// Progress callback drawing indicatif bars on stderr.
pub fn stderr_printer() -> impl FnMut(&DownloadProgress) + Send {
    let mut bars = DownloadBars::stderr();
    move |progress: &DownloadProgress| bars.update(progress)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn progress(file: &str, received: u64, total: Option<u64>) -> DownloadProgress {
        DownloadProgress {
            file_name: file.to_string(),
            bytes_received: received,
            total_bytes: total,
            bytes_per_second: 1024.0,
            estimated_time_remaining: Some(Duration::from_secs(1)),
        }
    }

    fn current(bars: &DownloadBars) -> &ProgressBar {
        &bars.current.as_ref().unwrap().1
    }

    #[test]
    fn test_bar_tracks_position_and_length() {
        let mut bars = DownloadBars::hidden();
        bars.update(&progress("model.gguf", 512, Some(2048)));

        let bar = current(&bars);
        assert_eq!(bar.length(), Some(2048));
        assert_eq!(bar.position(), 512);
        assert!(!bar.is_finished());

        bars.update(&progress("model.gguf", 2048, Some(2048)));
        assert!(current(&bars).is_finished());
    }

    #[test]
    fn test_new_file_finishes_previous_bar() {
        let mut bars = DownloadBars::hidden();
        bars.update(&progress("config.json", 10, Some(100)));
        let first = current(&bars).clone();

        bars.update(&progress("model.safetensors", 5, Some(1000)));
        assert!(first.is_finished());
        assert_eq!(current(&bars).position(), 5);
        assert_eq!(current(&bars).length(), Some(1000));
    }

    #[test]
    fn test_unknown_total_has_no_length() {
        let mut bars = DownloadBars::hidden();
        bars.update(&progress("stream.bin", 4096, None));
        assert_eq!(current(&bars).length(), None);
        assert_eq!(current(&bars).position(), 4096);
    }

    #[test]
    fn test_templates_parse() {
        assert!(ProgressStyle::default_bar().template(BAR_TEMPLATE).is_ok());
        assert!(ProgressStyle::default_spinner()
            .template(SPINNER_TEMPLATE)
            .is_ok());
    }
}
