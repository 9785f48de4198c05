use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, error, info, info_span};

use crate::logging::{self, LogOptions};
use crate::proxy::{self, VirshCommand};
use crate::ui;

use ravstack_core::app::Scope;
use ravstack_core::boot::BootDevice;
use ravstack_core::config::{self, CONFIG_PATH_ENV, Config, METADATA_PATH};
use ravstack_core::inventory::{self, Inventory};
use ravstack_core::retry::SystemClock;
use ravstack_runtime::client;
use ravstack_runtime::create::{self, CreateOptions};
use ravstack_runtime::dump;
use ravstack_runtime::power;
use ravstack_runtime::session::Session;

#[derive(Parser)]
#[command(
    name = "ravstack",
    version,
    about = "Run OpenStack Ironic bare-metal nodes as Ravello VMs"
)]
struct Cli {
    /// Enable debugging mode
    #[arg(short = 'd', long, global = true)]
    debug: bool,

    /// Be verbose (log to stderr)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Ravello user name
    #[arg(short = 'u', long, global = true)]
    username: Option<String>,

    /// Ravello password
    #[arg(short = 'p', long, global = true)]
    password: Option<String>,

    /// Ravello application name
    #[arg(short = 'a', long, global = true)]
    application: Option<String>,

    /// Name of the iPXE boot ISO
    #[arg(long, global = true)]
    pxe_iso: Option<String>,

    /// Config file (default: /etc/ravstack/ravstack.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a config file with every setting at its default
    ConfigCreate,

    // ---- Nodes ----
    /// Create new nodes, published but not started
    NodeCreate {
        /// Number of CPUs per node
        #[arg(short = 'c', long, default_value_t = 2)]
        cpus: u32,
        /// Memory per node in MB
        #[arg(short = 'm', long, default_value_t = 8192)]
        memory: u64,
        /// Disk size per node in GB
        #[arg(short = 'D', long, default_value_t = 60)]
        disk: u64,
        /// Number of nodes to create
        #[arg(short = 'n', long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
        count: u32,
    },
    /// Write the Ironic nodes file and /etc/ethers
    NodeDump,
    /// List running nodes, or all nodes with --all
    NodeList {
        /// List all nodes, not only running ones
        #[arg(long)]
        all: bool,
        /// Read names from the nodes file when it exists
        #[arg(long, requires = "all")]
        cached: bool,
    },
    /// Power on a node
    NodeStart { node: String },
    /// Power off a node
    NodeStop { node: String },
    /// Power off a node, then power it on again
    NodeReboot { node: String },
    /// Print the device a node boots from on its next start
    NodeGetBootDevice { node: String },
    /// Set the boot device of a node
    NodeSetBootDevice {
        node: String,
        #[arg(value_parser = ["hd", "network"])]
        device: String,
    },
    /// Print the MAC addresses of a node
    NodeGetMacs {
        node: String,
        /// Read MACs from the nodes file when it exists
        #[arg(long)]
        cached: bool,
    },

    // ---- Proxy ----
    /// Run a virsh command received by the Ironic SSH power driver
    ProxyRun,
}

/// The clap command tree, for man page generation.
pub fn cli_command() -> clap::Command {
    Cli::command()
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let mut debug = cli.debug;
    match execute(cli, &mut debug) {
        Ok(()) => Ok(()),
        Err(err) => report(err, debug),
    }
}

fn execute(cli: Cli, debug: &mut bool) -> Result<()> {
    let config = load_config(&cli, |name| std::env::var(name).ok(), Path::new(METADATA_PATH))?;
    *debug = config.get_bool("ravstack", "debug")?;
    logging::init(LogOptions {
        debug: *debug,
        verbose: config.get_bool("ravstack", "verbose")?,
    });

    let config_path = config_file(&cli);
    match cli.command {
        Commands::ConfigCreate => cmd_config_create(&config_path),
        Commands::NodeCreate {
            cpus,
            memory,
            disk,
            count,
        } => cmd_node_create(
            &config,
            &CreateOptions {
                cpus,
                memory_mb: memory,
                disk_gb: disk,
                count,
            },
        ),
        Commands::NodeDump => cmd_node_dump(&config),
        Commands::NodeList { all, cached } => cmd_node_list(&config, all, cached, false),
        Commands::NodeStart { node } => with_session(&config, |s| power::start(s, &node)),
        Commands::NodeStop { node } => with_session(&config, |s| power::stop(s, &node)),
        Commands::NodeReboot { node } => with_session(&config, |s| power::reboot(s, &node)),
        Commands::NodeGetBootDevice { node } => cmd_node_get_boot_device(&config, &node),
        Commands::NodeSetBootDevice { node, device } => {
            cmd_node_set_boot_device(&config, &node, device.parse()?)
        }
        Commands::NodeGetMacs { node, cached } => cmd_node_get_macs(&config, &node, cached, false),
        Commands::ProxyRun => cmd_proxy_run(&config),
    }
}

/// Top-level error handler. In debug mode the error propagates out of
/// `main` with its full chain; otherwise a one-line summary is printed.
fn report(err: anyhow::Error, debug: bool) -> Result<()> {
    error!("{:#}", err);
    if debug {
        return Err(err);
    }
    ui::error(&format!("{:#}", err));
    std::process::exit(1);
}

// ---- Configuration ----

fn config_file(cli: &Cli) -> PathBuf {
    config::config_path(cli.config.as_deref(), std::env::var(CONFIG_PATH_ENV).ok())
}

/// Defaults, then the config file, environment, flags and VM metadata,
/// each overriding the one before.
fn load_config<F>(cli: &Cli, env: F, metadata: &Path) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::defaults();
    let path = config::config_path(cli.config.as_deref(), env(CONFIG_PATH_ENV));
    config.load_file(&path)?;
    config.merge_env(&env);

    if cli.debug {
        config.set("ravstack", "debug", "true");
    }
    if cli.verbose {
        config.set("ravstack", "verbose", "true");
    }
    let flags = [
        ("username", &cli.username),
        ("password", &cli.password),
        ("application", &cli.application),
        ("pxe_iso", &cli.pxe_iso),
    ];
    for (name, value) in flags {
        if let Some(value) = value {
            config.set("ravello", name, value.as_str());
        }
    }

    config.load_metadata(metadata);
    Ok(config)
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

fn nodes_file(config: &Config) -> Result<PathBuf> {
    let path = config.require("tripleo", "nodes_file")?;
    Ok(config::expand_home(path, home_dir().as_deref()))
}

/// The nodes file, when `cached` is set and the file exists.
fn cached_inventory(config: &Config, cached: bool) -> Result<Option<Inventory>> {
    if !cached {
        return Ok(None);
    }
    let path = nodes_file(config)?;
    let inventory = dump::read_inventory(&path)?;
    if inventory.is_some() {
        debug!(path = %path.display(), "Using cached nodes file");
    }
    Ok(inventory)
}

/// Log in, open the configured application and run `f` on it.
fn with_session<T>(config: &Config, f: impl FnOnce(&mut Session<'_>) -> Result<T>) -> Result<T> {
    let client = client::connect(config)?;
    let clock = SystemClock;
    let result = Session::open(config, &client, &clock).and_then(|mut session| f(&mut session));
    if let Err(err) = client.logout() {
        debug!(error = %err, "logout failed");
    }
    result
}

// ---- Command handlers ----

fn cmd_config_create(path: &Path) -> Result<()> {
    config::write_defaults(path)?;
    ui::success(&format!("Created config file `{}`.", path.display()));
    Ok(())
}

fn cmd_node_create(config: &Config, options: &CreateOptions) -> Result<()> {
    let names = with_session(config, |s| create::create_nodes(s, options))?;
    ui::success(&ui::created_message(&names));
    Ok(())
}

fn cmd_node_dump(config: &Config) -> Result<()> {
    let home = home_dir().context("HOME is not set")?;
    let key = dump::read_private_key(&home, config.require("proxy", "key_name")?)?;
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .context("Cannot determine the login user")?;

    let nodes = with_session(config, |s| Ok(s.nodes()))?;
    let inventory = Inventory::build(&nodes, &user, &key)?;
    dump::write_inventory(&nodes_file(config)?, &inventory)?;
    ui::success(&format!(
        "Wrote {} nodes to `{}`.",
        inventory.nodes.len(),
        config.require("tripleo", "nodes_file")?
    ));

    match dump::write_ethers(&nodes)? {
        Some(count) => ui::success(&format!(
            "Wrote {} mac addresses to `{}`.",
            count,
            dump::ETHERS_FILE
        )),
        None => ui::warn(&format!("no sudo access, not writing `{}`.", dump::ETHERS_FILE)),
    }
    Ok(())
}

/// Without `all`, the running managed nodes. `virsh` quotes the names the
/// way `virsh list` does.
fn cmd_node_list(config: &Config, all: bool, cached: bool, virsh: bool) -> Result<()> {
    if !all {
        let names: Vec<String> = with_session(config, |s| {
            Ok(inventory::running(&s.nodes()).map(|vm| vm.name.clone()).collect())
        })?;
        for name in names {
            if virsh {
                println!("{}", proxy::virsh_name(&name));
            } else {
                println!("{}", name);
            }
        }
        return Ok(());
    }

    let names: Vec<String> = match cached_inventory(config, cached)? {
        Some(inventory) => inventory.nodes.into_iter().map(|n| n.name).collect(),
        None => with_session(config, |s| {
            Ok(inventory::managed(&s.nodes())
                .iter()
                .map(|vm| vm.name.clone())
                .collect())
        })?,
    };
    for name in names {
        println!("{}", name);
    }
    Ok(())
}

fn cmd_node_get_boot_device(config: &Config, node: &str) -> Result<()> {
    let device = with_session(config, |s| power::boot_device(s, node))?;
    println!("{}", device);
    Ok(())
}

fn cmd_node_set_boot_device(config: &Config, node: &str, device: BootDevice) -> Result<()> {
    with_session(config, |s| power::set_boot_device(s, node, device))
}

fn cmd_node_get_macs(config: &Config, node: &str, cached: bool, virsh: bool) -> Result<()> {
    let macs = match cached_inventory(config, cached)? {
        Some(inventory) => inventory.macs_of(node),
        None => with_session(config, |s| Ok(s.application.vm(node, Scope::Deployment)?.macs()))?,
    };
    for mac in macs {
        if virsh {
            println!("{}", proxy::virsh_mac(&mac));
        } else {
            println!("{}", mac);
        }
    }
    Ok(())
}

fn cmd_proxy_run(config: &Config) -> Result<()> {
    let peer = std::env::var("SSH_CONNECTION")
        .ok()
        .and_then(|value| logging::ssh_peer(&value))
        .unwrap_or_default();
    let span = info_span!("proxy", peer = %peer);
    let _enter = span.enter();

    let command = proxy::original_command(std::env::var(proxy::COMMAND_ENV).ok())?;
    debug!(%command, "New request");
    let parsed = proxy::parse(&command)?;
    info!(command = ?parsed, "Parsed command");

    // Ironic polls list and MAC lookups constantly; answer those from the
    // nodes file when possible.
    match parsed {
        VirshCommand::True => Ok(()),
        VirshCommand::Start(node) => with_session(config, |s| power::start(s, &node)),
        VirshCommand::Stop(node) => with_session(config, |s| power::stop(s, &node)),
        VirshCommand::Reboot(node) => with_session(config, |s| power::reboot(s, &node)),
        VirshCommand::ListRunning => cmd_node_list(config, false, true, true),
        VirshCommand::ListAll => cmd_node_list(config, true, true, true),
        VirshCommand::GetBootDevice(node) => cmd_node_get_boot_device(config, &node),
        VirshCommand::SetBootDevice { node, device } => {
            cmd_node_set_boot_device(config, &node, device)
        }
        VirshCommand::GetNodeMacs(node) => cmd_node_get_macs(config, &node, true, true),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ravstack").chain(args.iter().copied())).unwrap()
    }

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_cli_verifies() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_count_must_be_positive() {
        assert!(Cli::try_parse_from(["ravstack", "node-create", "-n", "0"]).is_err());
        match parse(&["node-create", "-n", "3", "-m", "4096"]).command {
            Commands::NodeCreate {
                count, memory, cpus, ..
            } => {
                assert_eq!((count, memory, cpus), (3, 4096, 2));
            }
            _ => panic!("expected node-create"),
        }
    }

    #[test]
    fn test_cached_requires_all() {
        assert!(Cli::try_parse_from(["ravstack", "node-list", "--cached"]).is_err());
        assert!(Cli::try_parse_from(["ravstack", "node-list", "--all", "--cached"]).is_ok());
    }

    #[test]
    fn test_boot_device_values() {
        assert!(Cli::try_parse_from(["ravstack", "node-set-boot-device", "node1", "cdrom"]).is_err());
        assert!(Cli::try_parse_from(["ravstack", "node-set-boot-device", "node1", "hd"]).is_ok());
    }

    #[test]
    fn test_config_layering() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("ravstack.toml");
        std::fs::write(
            &file,
            "[ravello]\nusername = \"file-user\"\npassword = \"file-pw\"\napplication = \"from-file\"\n",
        )
        .unwrap();
        let file_arg = file.to_string_lossy().into_owned();
        let metadata = dir.path().join("vm.json");
        std::fs::write(&metadata, r#"{"appName": "from-metadata"}"#).unwrap();

        let cli = parse(&["--config", &file_arg, "-u", "flag-user", "node-list"]);
        let config = load_config(&cli, env(&[("RAVELLO_PASSWORD", "env-pw")]), &metadata).unwrap();
        assert_eq!(config.get("ravello", "username"), Some("flag-user"));
        assert_eq!(config.get("ravello", "password"), Some("env-pw"));
        // A configured application wins over the metadata.
        assert_eq!(config.get("ravello", "application"), Some("from-file"));
        assert_eq!(config.get("ravello", "pxe_iso"), Some("ipxe.iso"));
    }

    #[test]
    fn test_config_path_from_env_and_metadata_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("custom.toml");
        std::fs::write(&file, "[ravstack]\ndebug = true\n").unwrap();
        let metadata = dir.path().join("vm.json");
        std::fs::write(&metadata, r#"{"appName": "from-metadata"}"#).unwrap();

        let cli = parse(&["node-list"]);
        let file_str = file.to_string_lossy().into_owned();
        let config = load_config(&cli, env(&[(CONFIG_PATH_ENV, file_str.as_str())]), &metadata).unwrap();
        assert!(config.get_bool("ravstack", "debug").unwrap());
        assert_eq!(config.get("ravello", "application"), Some("from-metadata"));
    }

    #[test]
    fn test_missing_config_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml").to_string_lossy().into_owned();
        let cli = parse(&["--config", &missing, "-d", "node-list"]);
        let config = load_config(&cli, env(&[]), &dir.path().join("vm.json")).unwrap();
        assert!(config.get_bool("ravstack", "debug").unwrap());
        assert_eq!(config.get("ravello", "application"), None);
    }
}
