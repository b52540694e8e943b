//! Foreground runner loop

use crate::Context;
use crate::app::App;
use crate::ui;
use anyhow::Result;
use std::thread;
use std::time::Duration;

/// How often the foreground loop prunes old changes
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

pub fn run(ctx: &Context, app: &App, once: bool) -> Result<()> {
    let runner = app.runner()?;
    app.prune()?;

    if once {
        runner.settle(Duration::MAX)?;
        if !ctx.quiet {
            ui::success("All changes are ready");
        }
        return Ok(());
    }

    let handle = runner.start()?;
    if !ctx.quiet {
        ui::info("Running changes; press Ctrl-C to stop");
    }
    loop {
        thread::sleep(PRUNE_INTERVAL);
        if let Err(e) = app.prune() {
            log::warn!("Pruning failed: {e:#}");
        }
        handle.wake();
    }
}
