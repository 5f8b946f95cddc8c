#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal output for the `planning_etl` binary: the logger and the
//! `indicatif` rendering of fetch and station progress.

use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use planning_etl_source::progress::{PageEvent, ProgressCallback};

pub use indicatif::MultiProgress;

const SPINNER_TEMPLATE: &str = "{spinner:.cyan} {msg} {pos} records";
const RECORDS_TEMPLATE: &str = "  {msg} {wide_bar:.cyan/dim} {pos}/{len} records [{eta}]";
const STEPS_TEMPLATE: &str = "{msg} {wide_bar:.green/dim} {pos}/{len} [{elapsed_precise}]";

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-")
}

/// Renders [`ProgressCallback`] events on an `indicatif` bar.
pub struct IndicatifProgress {
    bar: ProgressBar,
    label: String,
    /// Style used once a total is known.
    counted: ProgressStyle,
}

impl IndicatifProgress {
    fn records(multi: &MultiProgress, label: &str) -> Self {
        let bar = multi.add(ProgressBar::new_spinner());
        bar.enable_steady_tick(Duration::from_millis(100));
        bar.set_style(style(SPINNER_TEMPLATE));
        bar.set_message(label.to_string());

        Self {
            bar,
            label: label.to_string(),
            counted: style(RECORDS_TEMPLATE),
        }
    }

    fn steps(multi: &MultiProgress, label: &str, total: u64) -> Self {
        let counted = style(STEPS_TEMPLATE);
        let bar = multi.add(ProgressBar::new(total));
        bar.set_style(counted.clone());
        bar.set_message(label.to_string());

        Self {
            bar,
            label: label.to_string(),
            counted,
        }
    }

    /// Records fetched from one dataset. Spins until the source reports a
    /// total, then shows a bar with an ETA. The message names the last page.
    #[must_use]
    pub fn records_bar(multi: &MultiProgress, label: &str) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::records(multi, label))
    }

    /// One tick per finished step (e.g. stations 12/250). `total` may be 0
    /// and set later through [`ProgressCallback::expect`].
    #[must_use]
    pub fn steps_bar(multi: &MultiProgress, label: &str, total: u64) -> Arc<dyn ProgressCallback> {
        Arc::new(Self::steps(multi, label, total))
    }
}

impl ProgressCallback for IndicatifProgress {
    fn expect(&self, total: u64) {
        self.bar.set_length(total);
        self.bar.set_position(0);
        self.bar.set_style(self.counted.clone());
    }

    fn page(&self, event: PageEvent) {
        self.bar.set_position(event.accumulated);
        self.bar.set_message(format!(
            "{} page {} (offset {})",
            self.label,
            event.page + 1,
            event.offset
        ));
    }

    fn step(&self, label: &str) {
        self.bar.inc(1);
        self.bar.set_message(format!("{}: {label}", self.label));
    }

    fn finish(&self, summary: &str) {
        self.bar.finish_with_message(summary.to_string());
    }
}

/// Installs `pretty_env_logger` behind `indicatif-log-bridge`, so log lines
/// print above the bars instead of through them. `RUST_LOG` overrides the
/// default `info` level, which keeps count reports and runtimes visible.
///
/// Returns the [`MultiProgress`] every bar must be added to.
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let logger = pretty_env_logger::formatted_builder()
        .filter_level(log::LevelFilter::Info)
        .parse_env("RUST_LOG")
        .build();
    let level = logger.filter();

    // Fails only when a logger is already installed.
    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_err()
    {
        log::debug!("Logger already initialized");
    }
    log::set_max_level(level);

    multi
}
