//! install / update / remove

use crate::Context;
use crate::api::Request;
use crate::app::App;
use crate::cli::ChangeArgs;
use crate::ui;
use anyhow::{Result, bail};
use engine::{Change, Status};
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Update,
    Remove,
}

impl Action {
    fn as_str(self) -> &'static str {
        match self {
            Action::Install => "install",
            Action::Update => "update",
            Action::Remove => "remove",
        }
    }
}

/// Queue a snap change and, unless `--no-wait`, drive it to completion
pub fn run(
    ctx: &Context,
    app: &App,
    action: Action,
    name: &str,
    channel: &str,
    devmode: bool,
    common: &ChangeArgs,
) -> Result<()> {
    let mut req = Request::post(
        format!("/v2/snaps/{name}"),
        json!({"action": action.as_str(), "channel": channel, "devmode": devmode}),
    );
    if let Some(user) = common.user {
        req = req.with_authorization(app.authorization(user)?);
    }

    let id = app.request_change(&req)?;
    if common.no_wait {
        if !ctx.quiet {
            ui::info(&format!("Queued change {id}"));
        }
        println!("{id}");
        return Ok(());
    }

    let change = wait(ctx, app, &id)?;
    report(ctx, &change)
}

/// Run the change on this process until it is ready
pub fn wait(ctx: &Context, app: &App, id: &str) -> Result<Change> {
    let runner = app.runner()?;
    if ctx.quiet {
        return Ok(runner.wait_change(id, None, |_| {})?);
    }

    let mut bar = None;
    let change = runner.wait_change(id, None, |change| {
        let info = change.info();
        bar.get_or_insert_with(|| ui::ChangeBar::new(&info)).update(&info);
    })?;
    if let Some(bar) = bar {
        bar.finish();
    }
    Ok(change)
}

fn report(ctx: &Context, change: &Change) -> Result<()> {
    match change.status() {
        Status::Done => {
            if !ctx.quiet {
                ui::success(&change.summary);
            }
            Ok(())
        }
        status => {
            match change.err() {
                Some(err) => ui::error(&err),
                None => ui::warn(&format!("{} was aborted", change.summary)),
            }
            bail!("Change {} finished with status {status}", change.id)
        }
    }
}
