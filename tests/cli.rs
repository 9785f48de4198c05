use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::json;

/// A `ravstack` command isolated from the host's config, credentials and
/// home directory.
fn ravstack(home: &Path) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("ravstack").unwrap();
    cmd.env("HOME", home)
        .env("RAVSTACK_CONFIG", home.join("ravstack.toml"))
        .env_remove("RAVELLO_USERNAME")
        .env_remove("RAVELLO_PASSWORD")
        .env_remove("RAVELLO_APPLICATION")
        .env_remove("SSH_ORIGINAL_COMMAND")
        .env_remove("DEBUG")
        .env_remove("VERBOSE");
    cmd
}

fn write_nodes_file(home: &Path) {
    let entry = |name: &str, last: u8| {
        json!({
            "arch": "x86_64",
            "cpu": "2",
            "disk": "60",
            "mac": [format!("2c:c2:60:00:00:{:02x}", last)],
            "memory": "8192",
            "name": name,
            "pm_addr": "localhost",
            "pm_password": "KEY",
            "pm_type": "pxe_ssh",
            "pm_user": "stack",
        })
    };
    let inventory = json!({"nodes": [entry("node1", 11), entry("node2", 12)]});
    std::fs::write(
        home.join("instackenv.json"),
        serde_json::to_string_pretty(&inventory).unwrap(),
    )
    .unwrap();
}

#[test]
fn test_help_exits_successfully() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path()).arg("--help").assert().success();
}

#[test]
fn test_version_exits_successfully() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("ravstack"));
}

#[test]
fn test_no_args_shows_usage() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_help_lists_all_subcommands() {
    let home = tempfile::tempdir().unwrap();
    let assert = ravstack(home.path()).arg("--help").assert().success();
    let output = String::from_utf8(assert.get_output().stdout.clone()).unwrap();

    for cmd in [
        "config-create",
        "node-create",
        "node-dump",
        "node-list",
        "node-start",
        "node-stop",
        "node-reboot",
        "node-get-boot-device",
        "node-set-boot-device",
        "node-get-macs",
        "proxy-run",
    ] {
        assert!(
            output.contains(cmd),
            "Help output should list '{}' subcommand",
            cmd
        );
    }
}

#[test]
fn test_missing_credentials_reported() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .args(["node-start", "node1"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Config `[ravello]username` not set."))
        .stdout(predicate::str::contains("$RAVELLO_USERNAME or --username"));
}

#[test]
fn test_node_create_rejects_zero_count() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .args(["node-create", "--count", "0"])
        .assert()
        .failure();
}

#[test]
fn test_cached_requires_all() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .args(["node-list", "--cached"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--all"));
}

#[test]
fn test_node_list_cached_reads_nodes_file() {
    let home = tempfile::tempdir().unwrap();
    write_nodes_file(home.path());
    ravstack(home.path())
        .args(["node-list", "--all", "--cached"])
        .assert()
        .success()
        .stdout("node1\nnode2\n");
}

#[test]
fn test_node_get_macs_cached() {
    let home = tempfile::tempdir().unwrap();
    write_nodes_file(home.path());
    ravstack(home.path())
        .args(["node-get-macs", "node2", "--cached"])
        .assert()
        .success()
        .stdout("2c:c2:60:00:00:0c\n");
}

#[test]
fn test_config_create_refuses_overwrite() {
    let home = tempfile::tempdir().unwrap();
    let path = home.path().join("ravstack.toml");
    ravstack(home.path())
        .arg("config-create")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created config file"));
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains("[ravello]"));
    assert!(text.contains("#username"));

    ravstack(home.path())
        .arg("config-create")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("already exists. Not overwriting."));
    assert_eq!(std::fs::read_to_string(&path).unwrap(), text);
}

// ---- proxy-run ----

#[test]
fn test_proxy_requires_ssh() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .arg("proxy-run")
        .assert()
        .code(1)
        .stdout(predicate::str::contains(
            "This command needs to be run through ssh.",
        ));
}

#[test]
fn test_proxy_true_is_noop() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .arg("proxy-run")
        .env("SSH_ORIGINAL_COMMAND", "true")
        .assert()
        .success()
        .stdout("");
}

#[test]
fn test_proxy_unrecognized_command() {
    let home = tempfile::tempdir().unwrap();
    ravstack(home.path())
        .arg("proxy-run")
        .env("SSH_ORIGINAL_COMMAND", "cat /etc/shadow")
        .assert()
        .code(1)
        .stdout(predicate::str::contains("unrecognized command: cat /etc/shadow"));
}

#[test]
fn test_proxy_list_all_uses_nodes_file() {
    let home = tempfile::tempdir().unwrap();
    write_nodes_file(home.path());
    ravstack(home.path())
        .arg("proxy-run")
        .env(
            "SSH_ORIGINAL_COMMAND",
            "LC_ALL=C /usr/bin/virsh --connect qemu:///system list --all --name",
        )
        .assert()
        .success()
        .stdout("node1\nnode2\n");
}

#[test]
fn test_proxy_macs_without_colons() {
    let home = tempfile::tempdir().unwrap();
    write_nodes_file(home.path());
    ravstack(home.path())
        .arg("proxy-run")
        .env(
            "SSH_ORIGINAL_COMMAND",
            "LC_ALL=C /usr/bin/virsh --connect qemu:///system dumpxml node1 | awk -F \"'\" '/mac address/{print $2}'| tr -d ':'",
        )
        .assert()
        .success()
        .stdout("2cc26000000b\n");
}
