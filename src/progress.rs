//! Progress indicators for gridploy CLI.

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;

/// Progress bar for a batch of deployments. Hidden when `quiet`.
pub fn deploy_bar(len: u64, quiet: bool) -> ProgressBar {
    if quiet {
        return ProgressBar::with_draw_target(Some(len), ProgressDrawTarget::hidden());
    }

    let pb = ProgressBar::new(len);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} Deploying [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("=>-"));
    pb.set_style(style);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}
