//! Process-wide session: config, opened state, backend and control surface

use crate::api::{Api, Request, Response};
use crate::config::Config;
use anyhow::{Context, Result, bail};
use auth::{Authenticator, MacaroonAuthenticator};
use engine::backend::{Backend, LocalBackend};
use engine::{Runner, change};
use statestore::State;
use std::fs;
use std::sync::Arc;

pub struct App {
    pub config: Config,
    pub state: Arc<State>,
    backend: Arc<dyn Backend>,
    api: Api,
}

impl App {
    /// Open the configured state file and snaps directory
    pub fn open(config: Config) -> Result<Self> {
        let state_file = config.state_file()?;
        if let Some(parent) = state_file.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Could not create {}", parent.display()))?;
        }
        let state = State::open(&state_file)
            .with_context(|| format!("Could not open state file {}", state_file.display()))?;

        let backend = LocalBackend::new(config.snaps_root()?, config.store_url.clone())
            .with_retry(config.retry());
        Ok(Self::with_parts(config, Arc::new(state), Arc::new(backend)))
    }

    pub fn with_parts(config: Config, state: Arc<State>, backend: Arc<dyn Backend>) -> Self {
        let api = Api::new(Arc::clone(&state), Arc::clone(&backend));
        Self {
            config,
            state,
            backend,
            api,
        }
    }

    /// Send a request through the control surface; error envelopes become errors
    pub fn request(&self, req: &Request) -> Result<Response> {
        match self.api.handle(req) {
            Response::Error { result, .. } => bail!("{}", result.message),
            response => Ok(response),
        }
    }

    /// Send a request and return the change id of its async response
    pub fn request_change(&self, req: &Request) -> Result<String> {
        match self.request(req)? {
            Response::Async { change, .. } => Ok(change),
            other => bail!("Unexpected response: {other:?}"),
        }
    }

    /// Send a request and decode the result of its sync response
    pub fn request_sync<T: serde::de::DeserializeOwned>(&self, req: &Request) -> Result<T> {
        match self.request(req)? {
            Response::Sync { result, .. } => {
                serde_json::from_value(result).context("Malformed response")
            }
            other => bail!("Unexpected response: {other:?}"),
        }
    }

    /// `Authorization` header for a logged-in user
    pub fn authorization(&self, user_id: u64) -> Result<String> {
        let user = auth::user(&self.state.lock(), user_id)
            .with_context(|| format!("No logged-in user with id {user_id}"))?;
        Ok(MacaroonAuthenticator::new(user.macaroon, user.discharges).authorization())
    }

    /// Runner over this session's state, with interrupted work recovered
    pub fn runner(&self) -> Result<Arc<Runner>> {
        let runner = Runner::new(
            Arc::clone(&self.state),
            Arc::clone(&self.backend),
            self.config.runner_options(),
        )?;
        let interrupted = runner.recover()?;
        if interrupted > 0 {
            log::warn!("Marked {interrupted} interrupted task(s) as failed");
        }
        Ok(runner)
    }

    /// Drop ready changes past the configured age
    pub fn prune(&self) -> Result<usize> {
        let Some(older_than) = self.config.prune_after() else {
            return Ok(0);
        };
        let pruned = change::prune(&mut self.state.lock(), older_than)?;
        if pruned > 0 {
            log::info!("Pruned {pruned} old change(s)");
        }
        Ok(pruned)
    }
}
