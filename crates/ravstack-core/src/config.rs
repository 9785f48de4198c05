//! Layered configuration.
//!
//! Values are resolved once per invocation, lowest precedence first: schema
//! defaults, the TOML config file, environment variables, command-line flags
//! and finally the application name injected into the VM metadata. The
//! resulting [`Config`] is passed around by reference.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde_json::Value;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ravstack/ravstack.toml";
pub const CONFIG_PATH_ENV: &str = "RAVSTACK_CONFIG";
pub const METADATA_PATH: &str = "/etc/ravello/vm.json";

/// One configuration variable and the places it can come from.
#[derive(Debug, Clone, Copy)]
pub struct ConfigItem {
    pub section: &'static str,
    pub name: &'static str,
    pub default: Option<&'static str>,
    pub required: bool,
    pub description: &'static str,
    pub env: Option<&'static str>,
    pub flag: Option<&'static str>,
}

impl ConfigItem {
    const fn new(section: &'static str, name: &'static str, description: &'static str) -> Self {
        Self {
            section,
            name,
            default: None,
            required: false,
            description,
            env: None,
            flag: None,
        }
    }

    const fn default(mut self, value: &'static str) -> Self {
        self.default = Some(value);
        self
    }

    const fn required(mut self) -> Self {
        self.required = true;
        self
    }

    const fn env(mut self, var: &'static str) -> Self {
        self.env = Some(var);
        self
    }

    const fn flag(mut self, flag: &'static str) -> Self {
        self.flag = Some(flag);
        self
    }

    fn alternates(&self) -> Vec<String> {
        let mut alts = Vec::new();
        if let Some(env) = self.env {
            alts.push(format!("${}", env));
        }
        if let Some(flag) = self.flag {
            alts.push(flag.to_string());
        }
        alts
    }
}

pub static SCHEMA: &[ConfigItem] = &[
    ConfigItem::new("ravstack", "debug", "Enable debugging mode.")
        .default("false")
        .env("DEBUG")
        .flag("--debug"),
    ConfigItem::new("ravstack", "verbose", "Be verbose.")
        .default("false")
        .env("VERBOSE")
        .flag("--verbose"),
    ConfigItem::new("ravello", "username", "Ravello user name.")
        .required()
        .env("RAVELLO_USERNAME")
        .flag("--username"),
    ConfigItem::new("ravello", "password", "Ravello password.")
        .required()
        .env("RAVELLO_PASSWORD")
        .flag("--password"),
    ConfigItem::new(
        "ravello",
        "application",
        "Ravello application name. Taken from the VM metadata when running inside Ravello.",
    )
    .env("RAVELLO_APPLICATION")
    .flag("--application"),
    ConfigItem::new("ravello", "pxe_iso", "Name of the iPXE boot ISO attached to new nodes.")
        .default("ipxe.iso")
        .flag("--pxe-iso"),
    ConfigItem::new("ravello", "min_runtime", "Minimum application runtime left, in minutes.")
        .default("120"),
    ConfigItem::new("proxy", "key_name", "SSH key name used by the Ironic power proxy.")
        .default("id_ravstack"),
    ConfigItem::new("tripleo", "nodes_file", "Ironic nodes inventory file.")
        .default("~/instackenv.json"),
];

pub fn lookup_item(section: &str, name: &str) -> Option<&'static ConfigItem> {
    SCHEMA
        .iter()
        .find(|item| item.section == section && item.name == name)
}

fn is_known_section(section: &str) -> bool {
    SCHEMA.iter().any(|item| item.section == section)
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    values: BTreeMap<(String, String), String>,
}

impl Config {
    /// A config holding only the schema defaults.
    pub fn defaults() -> Self {
        let mut config = Self::default();
        for item in SCHEMA {
            if let Some(default) = item.default {
                config.set(item.section, item.name, default);
            }
        }
        config
    }

    pub fn set(&mut self, section: &str, name: &str, value: impl Into<String>) {
        self.values
            .insert((section.to_string(), name.to_string()), value.into());
    }

    pub fn get(&self, section: &str, name: &str) -> Option<&str> {
        self.values
            .get(&(section.to_string(), name.to_string()))
            .map(String::as_str)
    }

    /// Like [`Config::get`] but an unset value is an error naming the other
    /// places the value can come from.
    pub fn require(&self, section: &str, name: &str) -> Result<&str> {
        match self.get(section, name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => {
                let alternates = lookup_item(section, name)
                    .map(ConfigItem::alternates)
                    .unwrap_or_default();
                Err(ConfigError::Missing {
                    section: section.to_string(),
                    name: name.to_string(),
                    alternates,
                }
                .into())
            }
        }
    }

    pub fn get_int(&self, section: &str, name: &str) -> Result<i64> {
        let value = self.require(section, name)?;
        value.trim().parse().map_err(|_| {
            anyhow::Error::from(ConfigError::Invalid {
                section: section.to_string(),
                name: name.to_string(),
                value: value.to_string(),
                expected: "an integer",
            })
        })
    }

    /// Unset counts as false.
    pub fn get_bool(&self, section: &str, name: &str) -> Result<bool> {
        let Some(value) = self.get(section, name) else {
            return Ok(false);
        };
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            _ => Err(ConfigError::Invalid {
                section: section.to_string(),
                name: name.to_string(),
                value: value.to_string(),
                expected: "a boolean",
            }
            .into()),
        }
    }

    /// Merge a TOML document of `[section]` tables. Scalars of any type are
    /// kept as their string form.
    pub fn merge_toml(&mut self, text: &str) -> Result<()> {
        let doc: toml::Table = toml::from_str(text).context("Failed to parse config TOML")?;
        for (section, body) in doc {
            if !is_known_section(&section) {
                return Err(ConfigError::UnknownSection(section).into());
            }
            let Some(table) = body.as_table() else {
                bail!("Config section `{}` must be a table", section);
            };
            for (name, value) in table {
                let value = match value {
                    toml::Value::String(s) => s.clone(),
                    toml::Value::Integer(i) => i.to_string(),
                    toml::Value::Float(f) => f.to_string(),
                    toml::Value::Boolean(b) => b.to_string(),
                    other => bail!(
                        "Config `[{}]{}` must be a scalar, got {}",
                        section,
                        name,
                        other.type_str()
                    ),
                };
                self.set(&section, name, value);
            }
        }
        Ok(())
    }

    /// Merge the config file at `path`. A file that does not exist is
    /// treated as empty.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read config: {}", path.display()));
            }
        };
        self.merge_toml(&text)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Merge every schema variable that has an environment alternate set.
    pub fn merge_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        for item in SCHEMA {
            if let Some(value) = item.env.and_then(&lookup) {
                self.set(item.section, item.name, value);
            }
        }
    }

    /// Take the application name from the VM metadata document when none
    /// was configured.
    pub fn apply_metadata(&mut self, metadata: &Value) {
        if self.get("ravello", "application").is_some_and(|s| !s.is_empty()) {
            return;
        }
        if let Some(name) = metadata.get("appName").and_then(Value::as_str) {
            self.set("ravello", "application", name);
        }
    }

    /// Like [`Config::apply_metadata`], reading the document from `path`.
    /// A missing or unreadable file means no override.
    pub fn load_metadata(&mut self, path: &Path) {
        let Ok(text) = std::fs::read_to_string(path) else {
            return;
        };
        match serde_json::from_str::<Value>(&text) {
            Ok(metadata) => self.apply_metadata(&metadata),
            Err(e) => tracing::debug!(path = %path.display(), error = %e, "ignoring unreadable VM metadata"),
        }
    }
}

/// Config file path: explicit override first, then `$RAVSTACK_CONFIG`.
pub fn config_path(explicit: Option<&Path>, env: Option<String>) -> PathBuf {
    explicit
        .map(Path::to_path_buf)
        .or_else(|| env.filter(|s| !s.is_empty()).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// A config file listing every variable commented out at its default.
pub fn render_defaults() -> String {
    let mut out = String::from("# ravstack configuration\n");
    let mut section = "";
    for item in SCHEMA {
        if item.section != section {
            section = item.section;
            out.push_str(&format!("\n[{}]\n", section));
        }
        out.push_str(&format!("\n# {}", item.description));
        if item.required {
            out.push_str(" [required]");
        }
        out.push('\n');
        let alts = item.alternates();
        if !alts.is_empty() {
            out.push_str(&format!("# Also available as {}.\n", alts.join(" or ")));
        }
        out.push_str(&format!("#{} = \"{}\"\n", item.name, item.default.unwrap_or("")));
    }
    out
}

/// Write [`render_defaults`] to `path`, refusing to overwrite.
pub fn write_defaults(path: &Path) -> Result<()> {
    if path.exists() {
        bail!("Config file {} already exists. Not overwriting.", path.display());
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    file.write_all(render_defaults().as_bytes())?;
    Ok(())
}

/// Expand a leading `~/` against `home`.
pub fn expand_home(path: &str, home: Option<&Path>) -> PathBuf {
    match (path.strip_prefix("~/"), home) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}
