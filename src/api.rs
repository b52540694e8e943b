//! Control surface
//!
//! Transport-agnostic request router over the shared state. Every response
//! uses one of three JSON envelopes:
//!
//! - `{"type":"sync","status-code":200,"status":"OK","result":…}`
//! - `{"type":"async","status-code":202,"status":"Accepted","change":"<id>"}`
//! - `{"type":"error","status-code":N,"status":"…","result":{"message":…}}`

use auth::UserState;
use engine::backend::{Backend, InstallFlags};
use engine::{ChangeSelector, snapstate};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use statestore::{State, StateGuard};
use std::sync::{Arc, LazyLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// An incoming request
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Path with an optional query string, e.g. `/v2/changes?select=all`
    pub path: String,
    /// Raw `Authorization` header
    pub authorization: Option<String>,
    pub body: Option<Value>,
}

impl Request {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            path: path.into(),
            authorization: None,
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            path: path.into(),
            authorization: None,
            body: Some(body),
        }
    }

    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    fn split_path(&self) -> (&str, Option<&str>) {
        match self.path.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (self.path.as_str(), None),
        }
    }

    /// First value of query parameter `key`
    fn query(&self, key: &str) -> Option<&str> {
        self.split_path()
            .1?
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResult {
    pub message: String,
}

/// Response envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Response {
    Sync {
        #[serde(rename = "status-code")]
        status_code: u16,
        status: String,
        result: Value,
    },
    Async {
        #[serde(rename = "status-code")]
        status_code: u16,
        status: String,
        change: String,
    },
    Error {
        #[serde(rename = "status-code")]
        status_code: u16,
        status: String,
        result: ErrorResult,
    },
}

impl Response {
    fn sync(result: impl Serialize) -> Self {
        match serde_json::to_value(result) {
            Ok(result) => Response::Sync {
                status_code: 200,
                status: status_text(200).to_string(),
                result,
            },
            Err(e) => ApiError::internal(e).into(),
        }
    }

    fn accepted(change: String) -> Self {
        Response::Async {
            status_code: 202,
            status: status_text(202).to_string(),
            change,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Response::Sync { status_code, .. }
            | Response::Async { status_code, .. }
            | Response::Error { status_code, .. } => *status_code,
        }
    }
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        202 => "Accepted",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        _ => "Internal Server Error",
    }
}

/// Failure of a single request, rendered as an error envelope
#[derive(Debug, Clone, PartialEq, Eq)]
struct ApiError {
    status: u16,
    message: String,
}

impl ApiError {
    fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(400, message)
    }

    fn unauthorized() -> Self {
        Self::new(401, "invalid authentication")
    }

    fn internal(err: impl std::fmt::Display) -> Self {
        Self::new(500, err.to_string())
    }
}

impl From<ApiError> for Response {
    fn from(err: ApiError) -> Self {
        Response::Error {
            status_code: err.status,
            status: status_text(err.status).to_string(),
            result: ErrorResult {
                message: err.message,
            },
        }
    }
}

impl From<engine::Error> for ApiError {
    fn from(err: engine::Error) -> Self {
        use engine::Error as E;
        let status = match &err {
            E::InvalidSelector { .. }
            | E::ChangeReady { .. }
            | E::NotInstalled { .. }
            | E::AlreadyInstalled { .. }
            | E::RemovalRefused { .. } => 400,
            E::ChangeNotFound { .. } => 404,
            E::ChangeConflict { .. } => 409,
            E::Auth(auth::Error::InvalidUser { .. } | auth::Error::InvalidAuth) => 401,
            _ => 500,
        };
        Self::new(status, err.to_string())
    }
}

impl From<auth::Error> for ApiError {
    fn from(err: auth::Error) -> Self {
        match err {
            auth::Error::InvalidUser { .. } | auth::Error::InvalidAuth => Self::unauthorized(),
            auth::Error::State(e) => Self::internal(e),
        }
    }
}

impl From<statestore::Error> for ApiError {
    fn from(err: statestore::Error) -> Self {
        Self::internal(err)
    }
}

type ApiResult = std::result::Result<Response, ApiError>;

/// Macaroon and discharges carried by an `Authorization` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub macaroon: String,
    pub discharges: Vec<String>,
}

/// `key="value"` parameters of an `Authorization` header
static AUTH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).expect("static regex is valid"));

/// Parse `Macaroon root="…", discharge="…", …`
pub fn parse_authorization(header: &str) -> Option<Credentials> {
    let rest = header.trim().strip_prefix("Macaroon ")?;

    let mut macaroon = None;
    let mut discharges = Vec::new();
    for caps in AUTH_PARAM.captures_iter(rest) {
        match &caps[1] {
            "root" => macaroon = Some(caps[2].to_string()),
            "discharge" => discharges.push(caps[2].to_string()),
            _ => {}
        }
    }
    Some(Credentials {
        macaroon: macaroon.filter(|m| !m.is_empty())?,
        discharges,
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum SnapAction {
    Install,
    Update,
    Remove,
}

#[derive(Debug, Deserialize)]
struct SnapRequest {
    action: SnapAction,
    #[serde(default)]
    channel: String,
    #[serde(default)]
    devmode: bool,
}

#[derive(Debug, Deserialize)]
struct ChangeAction {
    action: String,
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    macaroon: String,
    #[serde(default)]
    discharges: Vec<String>,
}

#[derive(Debug, Serialize)]
struct LoginResult {
    id: u64,
    username: String,
    macaroon: String,
    discharges: Vec<String>,
}

impl From<UserState> for LoginResult {
    fn from(user: UserState) -> Self {
        Self {
            id: user.id,
            username: user.username,
            macaroon: user.macaroon,
            discharges: user.discharges,
        }
    }
}

fn decode_body<T: serde::de::DeserializeOwned>(req: &Request) -> std::result::Result<T, ApiError> {
    let body = req
        .body
        .clone()
        .ok_or_else(|| ApiError::bad_request("missing request body"))?;
    serde_json::from_value(body)
        .map_err(|e| ApiError::bad_request(format!("cannot decode request body: {e}")))
}

/// Request router over the shared state
pub struct Api {
    state: Arc<State>,
    backend: Arc<dyn Backend>,
}

impl Api {
    pub fn new(state: Arc<State>, backend: Arc<dyn Backend>) -> Self {
        Self { state, backend }
    }

    pub fn handle(&self, req: &Request) -> Response {
        let (path, _) = req.split_path();
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

        let result = match (req.method, segments.as_slice()) {
            (Method::Get, ["v2", "changes"]) => self.get_changes(req),
            (Method::Get, ["v2", "changes", id]) => self.get_change(id),
            (Method::Post, ["v2", "changes", id]) => self.post_change(req, id),
            (Method::Post, ["v2", "snaps", name]) => self.post_snap(req, name),
            (Method::Post, ["v2", "login"]) => self.login(req),
            (Method::Post, ["v2", "logout"]) => self.logout(req),
            (_, ["v2", "changes" | "login" | "logout"] | ["v2", "changes" | "snaps", _]) => {
                Err(ApiError::new(405, "method not allowed"))
            }
            _ => Err(ApiError::new(404, format!("no route for {path}"))),
        };

        let response = result.unwrap_or_else(Response::from);
        log::debug!(
            "{:?} {} -> {}",
            req.method,
            req.path,
            response.status_code()
        );
        response
    }

    /// User named by the request's `Authorization` header, if it has one
    fn user(&self, st: &StateGuard<'_>, req: &Request) -> std::result::Result<Option<UserState>, ApiError> {
        let Some(header) = req.authorization.as_deref() else {
            return Ok(None);
        };
        let creds = parse_authorization(header).ok_or_else(ApiError::unauthorized)?;
        Ok(Some(auth::check_macaroon(st, &creds.macaroon, &creds.discharges)?))
    }

    fn get_changes(&self, req: &Request) -> ApiResult {
        let selector = match req.query("select") {
            Some(select) => select.parse()?,
            None => ChangeSelector::default(),
        };
        let changes = engine::changes(&self.state.lock(), selector)?;
        let infos: Vec<_> = changes.iter().map(engine::Change::info).collect();
        Ok(Response::sync(infos))
    }

    fn get_change(&self, id: &str) -> ApiResult {
        let change = engine::change::change(&self.state.lock(), id)?;
        Ok(Response::sync(change.info()))
    }

    fn post_change(&self, req: &Request, id: &str) -> ApiResult {
        let body: ChangeAction = decode_body(req)?;
        if body.action != "abort" {
            return Err(ApiError::bad_request(format!(
                "change action {:?} is unsupported",
                body.action
            )));
        }
        let change = engine::abort(&mut self.state.lock(), id)?;
        Ok(Response::sync(change.info()))
    }

    fn post_snap(&self, req: &Request, name: &str) -> ApiResult {
        let body: SnapRequest = decode_body(req)?;
        let flags = InstallFlags {
            devmode: body.devmode,
        };

        let change = match body.action {
            SnapAction::Install | SnapAction::Update => {
                let mut st = self.state.lock();
                let user_id = self.user(&st, req)?.map(|u| u.id);
                if matches!(body.action, SnapAction::Install) {
                    snapstate::install(&mut st, name, &body.channel, flags, user_id)?
                } else {
                    snapstate::update(&mut st, name, &body.channel, flags, user_id)?
                }
            }
            SnapAction::Remove => {
                self.user(&self.state.lock(), req)?;
                snapstate::remove(&self.state, self.backend.as_ref(), name)?
            }
        };
        Ok(Response::accepted(change.id))
    }

    fn login(&self, req: &Request) -> ApiResult {
        let body: LoginRequest = decode_body(req)?;
        if body.username.is_empty() || body.macaroon.is_empty() {
            return Err(ApiError::bad_request("username and macaroon are required"));
        }
        let user = auth::new_user(
            &mut self.state.lock(),
            &body.username,
            &body.macaroon,
            body.discharges,
        )?;
        Ok(Response::sync(LoginResult::from(user)))
    }

    fn logout(&self, req: &Request) -> ApiResult {
        let mut st = self.state.lock();
        let user = self.user(&st, req)?.ok_or_else(ApiError::unauthorized)?;
        auth::remove_user(&mut st, user.id)?;
        Ok(Response::sync(json!(null)))
    }
}
