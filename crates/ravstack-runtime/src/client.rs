//! Minimal Ravello REST API client.

use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use ravstack_core::app::Application;
use ravstack_core::config::Config;
use ravstack_core::error::ApiError;
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use tracing::debug;

pub const API_URL: &str = "https://cloud.ravellosystems.com/api/v1";

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_REDIRECTS: usize = 3;

/// A JSON call against the Ravello API.
///
/// `path` is relative to the API root (`/applications/1`). Error responses
/// come back as an [`ApiError`] inside the `anyhow::Error`. An empty
/// response body is `Ok(None)`.
pub trait RavelloApi {
    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>>;
}

pub struct RavelloClient {
    http: reqwest::blocking::Client,
    base_url: String,
}

impl RavelloClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(API_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        let http = reqwest::blocking::Client::builder()
            .user_agent(concat!("ravstack/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .cookie_store(true)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            path.to_string()
        }
    }

    /// Log in with basic auth. The session cookie is kept by the client.
    pub fn login(&self, username: &str, password: &str) -> Result<Value> {
        let resp = self
            .http
            .post(self.url("/login"))
            .basic_auth(username, Some(password))
            .send()
            .context("HTTP request failed: POST /login")?;
        let status = resp.status();
        if let Some(err) = status_error(&Method::POST, "/login", status, resp.headers()) {
            return Err(err.into());
        }
        let user: Value = resp.json().context("Failed to parse login response")?;
        let org = user
            .pointer("/organizationProfile/organizationName")
            .and_then(Value::as_str)
            .unwrap_or("");
        debug!(username, organization = org, "logged in");
        Ok(user)
    }

    pub fn logout(&self) -> Result<()> {
        self.call(Method::POST, "/logout", None)?;
        Ok(())
    }
}

impl RavelloApi for RavelloClient {
    fn call(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Option<Value>> {
        let mut req = self.http.request(method.clone(), self.url(path));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req
            .send()
            .with_context(|| format!("HTTP request failed: {} {}", method, path))?;
        if let Some(err) = status_error(&method, path, resp.status(), resp.headers()) {
            return Err(err.into());
        }
        let bytes = resp
            .bytes()
            .with_context(|| format!("Failed to read response body: {} {}", method, path))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let value = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse JSON from {} {}", method, path))?;
        Ok(Some(value))
    }
}

/// Turn a 4xx/5xx status into an [`ApiError`], including the platform's
/// `Error-Code` and `Error-Message` headers when present.
pub fn status_error(
    method: &Method,
    path: &str,
    status: StatusCode,
    headers: &HeaderMap,
) -> Option<ApiError> {
    let kind = if status.is_client_error() {
        "Client"
    } else if status.is_server_error() {
        "Server"
    } else {
        return None;
    };
    let mut message = format!(
        "{} Error: {} {} for `{} {}`.",
        kind,
        status.as_u16(),
        status.canonical_reason().unwrap_or(""),
        method,
        path
    );
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    if let Some(code) = header("Error-Code") {
        message.push_str(&format!(" ({}: {})", code, header("Error-Message").unwrap_or("")));
    }
    Some(ApiError::new(status.as_u16(), message))
}

/// Log in with the configured credentials.
pub fn connect(config: &Config) -> Result<RavelloClient> {
    let username = config.require("ravello", "username")?;
    let password = config.require("ravello", "password")?;
    let client = RavelloClient::new()?;
    if let Err(err) = client.login(username, password) {
        if config.get_bool("ravstack", "debug")? {
            return Err(err);
        }
        debug!(error = %err, "login failed");
        bail!("login failed with provided credentials");
    }
    Ok(client)
}

/// A filter matching objects whose `field` equals `value`.
pub fn simple_filter(field: &str, value: &str) -> Value {
    json!({
        "type": "COMPLEX",
        "operator": "And",
        "criteria": [
            {"type": "SIMPLE", "propertyName": field, "operator": "Equals", "operand": value}
        ]
    })
}

fn document(resp: Option<Value>, what: &str) -> Result<Value> {
    resp.ok_or_else(|| anyhow!("Empty response for {}", what))
}

fn parse_application(value: Value) -> Result<Application> {
    let mut app: Application =
        serde_json::from_value(value).context("Failed to parse application document")?;
    app.sort_connections();
    Ok(app)
}

pub fn get_application(api: &dyn RavelloApi, id: u64) -> Result<Application> {
    let path = format!("/applications/{}", id);
    parse_application(document(api.call(Method::GET, &path, None)?, &path)?)
}

pub fn find_application(api: &dyn RavelloApi, name: &str) -> Result<Application> {
    let found = api.call(
        Method::POST,
        "/applications/filter",
        Some(&simple_filter("name", name)),
    )?;
    let id = found
        .as_ref()
        .and_then(Value::as_array)
        .and_then(|apps| apps.first())
        .and_then(|app| app.get("id"))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Application `{}` not found", name))?;
    get_application(api, id)
}

/// Write `app` back and publish the change. Returns the document the
/// platform answered the `PUT` with.
pub fn update_application(
    api: &dyn RavelloApi,
    app: &Application,
    start_draft_vms: bool,
) -> Result<Application> {
    let path = format!("/applications/{}", app.id);
    let body = serde_json::to_value(app)?;
    let updated = parse_application(document(api.call(Method::PUT, &path, Some(&body))?, &path)?)?;
    let mut publish = format!("{}/publishUpdates", path);
    if !start_draft_vms {
        publish.push_str("?startAllDraftVms=false");
    }
    api.call(Method::POST, &publish, None)?;
    Ok(updated)
}

pub fn find_disk_image(api: &dyn RavelloApi, name: &str) -> Result<Option<u64>> {
    let images = api.call(Method::GET, "/diskImages", None)?;
    Ok(images
        .as_ref()
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find(|image| image.get("name").and_then(Value::as_str) == Some(name))
        .and_then(|image| image.get("id"))
        .and_then(Value::as_u64))
}

pub fn set_expiration(api: &dyn RavelloApi, app_id: u64, seconds: i64) -> Result<()> {
    let body = json!({"expirationFromNowSeconds": seconds});
    api.call(
        Method::POST,
        &format!("/applications/{}/setExpiration", app_id),
        Some(&body),
    )?;
    Ok(())
}

/// Run a VM action such as `start` or `poweroff`.
pub fn vm_action(api: &dyn RavelloApi, app_id: u64, vm_id: u64, action: &str) -> Result<()> {
    api.call(
        Method::POST,
        &format!("/applications/{}/vms/{}/{}", app_id, vm_id, action),
        None,
    )?;
    Ok(())
}
