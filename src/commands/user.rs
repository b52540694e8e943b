//! login / logout

use crate::Context;
use crate::api::Request;
use crate::app::App;
use crate::ui;
use anyhow::Result;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct LoggedIn {
    id: u64,
    username: String,
}

pub fn login(
    ctx: &Context,
    app: &App,
    username: &str,
    macaroon: &str,
    discharges: &[String],
) -> Result<()> {
    let user: LoggedIn = app.request_sync(&Request::post(
        "/v2/login",
        json!({"username": username, "macaroon": macaroon, "discharges": discharges}),
    ))?;
    if !ctx.quiet {
        ui::success(&format!("Logged in {} as user {}", user.username, user.id));
    }
    Ok(())
}

pub fn logout(ctx: &Context, app: &App, id: u64) -> Result<()> {
    let header = app.authorization(id)?;
    app.request(&Request::post("/v2/logout", json!({})).with_authorization(header))?;
    if !ctx.quiet {
        ui::success(&format!("Logged out user {id}"));
    }
    Ok(())
}
