//! changes / change / abort

use crate::Context;
use crate::api::Request;
use crate::app::App;
use crate::cli::Select;
use crate::ui;
use anyhow::Result;
use engine::ChangeInfo;
use serde_json::json;

pub fn list(_ctx: &Context, app: &App, select: Select) -> Result<()> {
    let changes: Vec<ChangeInfo> = app.request_sync(&Request::get(format!(
        "/v2/changes?select={}",
        select.as_query()
    )))?;
    ui::change_table(&changes);
    Ok(())
}

pub fn show(_ctx: &Context, app: &App, id: &str) -> Result<()> {
    let change: ChangeInfo = app.request_sync(&Request::get(format!("/v2/changes/{id}")))?;
    ui::change_detail(&change);
    Ok(())
}

pub fn abort(ctx: &Context, app: &App, id: &str) -> Result<()> {
    let change: ChangeInfo = app.request_sync(&Request::post(
        format!("/v2/changes/{id}"),
        json!({"action": "abort"}),
    ))?;
    if !ctx.quiet {
        if change.ready {
            ui::success(&format!("Change {id} aborted"));
        } else {
            ui::info(&format!(
                "Abort requested for change {id}; it rolls back on the next run"
            ));
        }
    }
    Ok(())
}
