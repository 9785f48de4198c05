//! Developer tasks: `cargo run -p xtask -- man [--out-dir DIR]`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "xtask")]
struct Xtask {
    #[command(subcommand)]
    task: Task,
}

#[derive(Subcommand)]
enum Task {
    /// Generate man pages for ravstack and each subcommand
    Man {
        #[arg(long, default_value = "target/man")]
        out_dir: PathBuf,
    },
}

fn main() -> Result<()> {
    match Xtask::parse().task {
        Task::Man { out_dir } => {
            let written = write_man_pages(&out_dir)?;
            println!("Wrote {} man pages to {}", written, out_dir.display());
            Ok(())
        }
    }
}

fn write_man_pages(out_dir: &Path) -> Result<usize> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let cmd = ravstack_cli::cli_command();
    let mut written = 0;

    render(&cmd, &out_dir.join("ravstack.1"))?;
    written += 1;
    for sub in cmd.get_subcommands() {
        let name = format!("ravstack-{}", sub.get_name());
        let page = sub.clone().name(name.clone());
        render(&page, &out_dir.join(format!("{}.1", name)))?;
        written += 1;
    }
    Ok(written)
}

fn render(cmd: &clap::Command, path: &Path) -> Result<()> {
    let mut buf = Vec::new();
    clap_mangen::Man::new(cmd.clone())
        .render(&mut buf)
        .with_context(|| format!("Failed to render {}", path.display()))?;
    std::fs::write(path, buf).with_context(|| format!("Failed to write {}", path.display()))
}
