//! Per-command working state.
//!
//! A [`Session`] is built once per command. It holds the configuration,
//! the API connection, a clock and the application document the command
//! operates on. Nothing is fetched behind the caller's back: the document
//! changes only through [`Session::reload`] and [`Session::publish`].

use anyhow::Result;
use ravstack_core::app::{Application, Vm};
use ravstack_core::config::Config;
use ravstack_core::inventory;
use ravstack_core::retry::{Clock, RetryPolicy, retry_operation};
use tracing::debug;

use crate::client::{self, RavelloApi};

pub struct Session<'a> {
    pub config: &'a Config,
    pub api: &'a dyn RavelloApi,
    pub clock: &'a dyn Clock,
    pub application: Application,
}

impl<'a> Session<'a> {
    pub fn new(
        config: &'a Config,
        api: &'a dyn RavelloApi,
        clock: &'a dyn Clock,
        application: Application,
    ) -> Self {
        Self {
            config,
            api,
            clock,
            application,
        }
    }

    /// Look up the configured application and start a session on it.
    pub fn open(config: &'a Config, api: &'a dyn RavelloApi, clock: &'a dyn Clock) -> Result<Self> {
        let name = config.require("ravello", "application")?;
        let application = client::find_application(api, name)?;
        debug!(application = name, id = application.id, "using application");
        Ok(Self::new(config, api, clock, application))
    }

    /// Re-fetch the application document.
    pub fn reload(&mut self) -> Result<()> {
        self.application = client::get_application(self.api, self.application.id)?;
        Ok(())
    }

    /// Write the in-memory document back and publish it. The document the
    /// platform returns replaces the local copy.
    pub fn publish(&mut self, start_draft_vms: bool) -> Result<()> {
        self.application = client::update_application(self.api, &self.application, start_draft_vms)?;
        Ok(())
    }

    pub fn nodes(&self) -> Vec<Vm> {
        inventory::derive_nodes(&self.application)
    }

    /// Push the application's expiration out when less than the configured
    /// minimum runtime is left.
    pub fn ensure_min_runtime(&self) -> Result<()> {
        let Some(next_stop) = self.application.next_stop_time else {
            return Ok(());
        };
        let minutes = self.config.get_int("ravello", "min_runtime")?;
        let seconds = minutes * 60;
        if next_stop >= self.clock.unix_millis() + seconds * 1000 {
            return Ok(());
        }
        let stops_at = chrono::DateTime::from_timestamp_millis(next_stop)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        debug!(minutes, %stops_at, "Expiration less than minimum requested, extending runtime");
        let app_id = self.application.id;
        retry_operation(&RetryPolicy::default(), "extend runtime", self.clock, |_| {
            client::set_expiration(self.api, app_id, seconds)
        })
    }
}
