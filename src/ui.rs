//! Terminal UI: progress bars, and a stderr writer that plays nicely with
//! them.
//!
//! The stderr writer follows the approach used by `substudy` by Eric Kidd,
//! which is licensed under Apache-2.0 OR MIT.

use std::{borrow::Cow, io, sync::Arc, time::Duration};

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Shared UI state. Cheap to clone.
#[derive(Clone)]
pub struct Ui {
    multi_progress: Arc<MultiProgress>,
}

impl Ui {
    /// Create a new UI with visible progress bars.
    pub fn init() -> Ui {
        Ui {
            multi_progress: Arc::new(MultiProgress::new()),
        }
    }

    /// Create a new UI for unit tests.
    #[cfg(test)]
    pub fn init_for_tests() -> Ui {
        Ui {
            multi_progress: Arc::new(MultiProgress::with_draw_target(
                ProgressDrawTarget::hidden(),
            )),
        }
    }

    /// Hide all progress bars. Used when our real output goes to stdout, or
    /// when we're running as a server.
    pub fn hide_progress_bars(&self) {
        self.multi_progress.set_draw_target(ProgressDrawTarget::hidden());
    }

    /// A writer for `tracing` which suspends progress bars while writing.
    pub fn get_stderr_writer(&self) -> SafeStderrWriter {
        SafeStderrWriter { ui: self.clone() }
    }

    /// Create a progress bar if we know how many items to expect, or a
    /// spinner if we don't.
    pub fn new_for_len(&self, config: &ProgressConfig<'_>, len: Option<u64>) -> ProgressBar {
        match len {
            Some(len) if len > 0 => self.add(
                ProgressBar::new(len).with_style(progress_style()),
                config,
            ),
            _ => self.new_spinner(config),
        }
    }

    /// Create a spinner for work of unknown length.
    pub fn new_spinner(&self, config: &ProgressConfig<'_>) -> ProgressBar {
        self.add(
            ProgressBar::new_spinner().with_style(spinner_style()),
            config,
        )
    }

    fn add(&self, pb: ProgressBar, config: &ProgressConfig<'_>) -> ProgressBar {
        let pb = self.multi_progress.add(pb);
        #[cfg(test)]
        pb.set_draw_target(ProgressDrawTarget::hidden());
        pb.set_prefix(config.emoji.to_owned());
        pb.set_message(config.msg.to_owned());
        pb.enable_steady_tick(Duration::from_millis(250));
        pb.with_finish(indicatif::ProgressFinish::WithMessage(Cow::Owned(
            config.done_msg.to_owned(),
        )))
    }

    /// Print a one-line message to stderr without disturbing progress bars.
    pub fn display_message(&self, emoji: &str, msg: &str) {
        self.multi_progress.suspend(|| eprintln!("{emoji} {msg}"));
    }
}

/// Labels for a progress bar.
pub struct ProgressConfig<'a> {
    /// Shown before the message.
    pub emoji: &'a str,
    /// Shown while running.
    pub msg: &'a str,
    /// Shown once finished.
    pub done_msg: &'a str,
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {prefix:3}{msg:25} {pos:>5}/{len:5} {elapsed_precise} {wide_bar:.green/blue} {eta_precise}")
        .expect("bad progress bar template")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner} {prefix:3}{msg} {pos}")
        .expect("bad progress bar template")
}

/// Writes to stderr, suspending progress bars while it does so.
#[derive(Clone)]
pub struct SafeStderrWriter {
    ui: Ui,
}

impl io::Write for SafeStderrWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ui.multi_progress.suspend(|| io::stderr().write(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.ui.multi_progress.suspend(|| io::stderr().write_all(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.ui.multi_progress.suspend(|| io::stderr().flush())
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for SafeStderrWriter {
    type Writer = SafeStderrWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}
