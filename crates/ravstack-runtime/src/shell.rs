use anyhow::{Context, Result, bail};
use std::process::{Command, Output};

/// Run a command on the host, capturing output.
pub fn run_host(cmd: &str, args: &[&str]) -> Result<Output> {
    #[cfg(test)]
    if let Some(output) = crate::shell_mock::intercept(&command_line(cmd, args)) {
        return Ok(output);
    }

    Command::new(cmd)
        .args(args)
        .output()
        .with_context(|| format!("Failed to run: {}", command_line(cmd, args)))
}

/// Run a command as root through non-interactive sudo. Fails on a
/// non-zero exit.
pub fn run_sudo(args: &[&str]) -> Result<()> {
    let mut full = vec!["-n"];
    full.extend_from_slice(args);
    let output = run_host("sudo", &full)?;
    if !output.status.success() {
        bail!(
            "Command failed (exit {}): sudo {}: {}",
            output.status.code().unwrap_or(-1),
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}

/// Whether the current user may run a root shell through sudo without a
/// password.
pub fn can_run_sudo() -> bool {
    run_host("sudo", &["-n", "-u", "root", "-l", "/bin/sh"])
        .map(|o| o.status.success())
        .unwrap_or(false)
}

pub fn selinux_enabled() -> bool {
    let Ok(output) = run_host("getenforce", &[]) else {
        return false;
    };
    let mode = String::from_utf8_lossy(&output.stdout).trim().to_ascii_lowercase();
    output.status.success() && matches!(mode.as_str(), "enforcing" | "permissive")
}

fn command_line(cmd: &str, args: &[&str]) -> String {
    if args.is_empty() {
        cmd.to_string()
    } else {
        format!("{} {}", cmd, args.join(" "))
    }
}
