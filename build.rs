//! Build script rendering the `bdsrotator` manual pages.
//!
//! Writes `bdsrotator.1` plus one page per subcommand
//! (`bdsrotator-start.1`, `bdsrotator-stop.1`) into `OUT_DIR` for packaging.

use std::env;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use clap::{Command, CommandFactory};
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir = env::var_os("OUT_DIR")
        .map(PathBuf::from)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "OUT_DIR was not set"))?;

    let command = Cli::command();
    for sub in command.get_subcommands() {
        let name = format!("{}-{}", command.get_name(), sub.get_name());
        render(&out_dir, &name, sub.clone().display_name(name.clone()))?;
    }
    let name = command.get_name().to_owned();
    render(&out_dir, &name, command)?;

    Ok(())
}

fn render(out_dir: &Path, name: &str, command: Command) -> io::Result<()> {
    let mut buffer = Vec::new();
    Man::new(command).render(&mut buffer)?;
    File::create(out_dir.join(format!("{name}.1")))?.write_all(&buffer)
}
