use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Tasks for the project", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the project
    Build,
    /// Run the test suite
    Test,
    /// Flash a custom OS image with the CLI
    Flash {
        /// Path to os.bin
        os_bin: String,
        /// Extra arguments passed to harmony-flash
        #[arg(trailing_var_arg = true)]
        args: Vec<String>,
    },
}

fn cargo(args: &[&str], what: &str) -> Result<()> {
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{} failed", what);
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Build => {
            println!("Building project...");
            cargo(&["build", "--workspace"], "Build")?;
        }
        Commands::Test => {
            println!("Running tests...");
            cargo(&["test", "--workspace"], "Tests")?;
        }
        Commands::Flash { os_bin, args } => {
            println!("Flashing {}...", os_bin);
            let mut cmd = vec!["run", "-p", "harmony-cli", "--", os_bin.as_str()];
            cmd.extend(args.iter().map(String::as_str));
            cargo(&cmd, "Flash")?;
        }
    }

    Ok(())
}
