use anyhow::{Context as _, Result};
use deploykit::Bootstrapper;
use std::path::Path;

use crate::Context;
use crate::paths;
use crate::ui;

pub fn run(ctx: &Context, resource: &str, dir: &Path) -> Result<()> {
    let bootstrapper = Bootstrapper::new();
    let dest = paths::expand(&dir.to_string_lossy());

    let materialized = match bootstrapper.materialize(resource, &dest) {
        Ok(m) => m,
        Err(e) => {
            ui::error(&e.to_string());
            ui::dim(&format!("available: {}", bootstrapper.available().join(", ")));
            return Err(e).with_context(|| format!("Could not bootstrap {resource}"));
        }
    };

    if !ctx.quiet {
        ui::success(&format!("Wrote {}", materialized.path.display()));
        ui::kv("size", &ui::format_size(materialized.len));
        ui::kv("blake3", &materialized.digest);
    }
    Ok(())
}
