use colored::Colorize;

// Operator-facing messages. Plain data output (node names, MACs, boot
// devices) is printed with println! by the commands so scripts and the
// virsh proxy can consume it.

/// Print a success message (in green).
pub fn success(msg: &str) {
    println!("{}", msg.green());
}

/// Print a warning message (in yellow).
pub fn warn(msg: &str) {
    println!("{} {}", "Warning:".bold().yellow(), msg.yellow());
}

/// Print the one-line summary of a failed command. Goes to stdout: the
/// proxy's caller only looks there.
pub fn error(msg: &str) {
    println!("{} {}", "Error:".bold().red(), msg);
}

/// `Created 2 nodes: node3, node4.`
pub fn created_message(names: &[String]) -> String {
    format!(
        "Created {} node{}: {}.",
        names.len(),
        if names.len() == 1 { "" } else { "s" },
        names.join(", ")
    )
}
