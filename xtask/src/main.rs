use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for chronoverse")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full gate: fmt, clippy, tests, deny, doc
    Check,
    /// Check formatting across the workspace
    Fmt,
    /// Lint the workspace, warnings denied
    Clippy,
    /// Run every workspace test
    Test,
    /// Audit licenses, bans, and sources
    Deny,
    /// Build rustdoc without dependencies
    Doc,
    /// Build every workspace member
    Build,
}

/// Each step is a cargo invocation; `Check` chains them in gate order.
const FMT: Step = Step {
    label: "cargo fmt --check",
    args: &["fmt", "--all", "--", "--check"],
};
const CLIPPY: Step = Step {
    label: "cargo clippy",
    args: &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
};
const TEST: Step = Step {
    label: "cargo test",
    args: &["test", "--workspace"],
};
const DENY: Step = Step {
    label: "cargo deny check",
    args: &["deny", "check", "licenses", "bans", "sources"],
};
const DOC: Step = Step {
    label: "cargo doc",
    args: &["doc", "--workspace", "--no-deps"],
};
const BUILD: Step = Step {
    label: "cargo build",
    args: &["build", "--workspace"],
};

struct Step {
    label: &'static str,
    args: &'static [&'static str],
}

impl Step {
    fn run(&self) -> Result<()> {
        println!("==> Running {}", self.label);
        let status = Command::new("cargo").args(self.args).status()?;
        if !status.success() {
            anyhow::bail!("{} failed", self.label);
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            for step in [FMT, CLIPPY, TEST, DENY, DOC] {
                step.run()?;
            }
        }
        Commands::Fmt => FMT.run()?,
        Commands::Clippy => CLIPPY.run()?,
        Commands::Test => TEST.run()?,
        Commands::Deny => DENY.run()?,
        Commands::Doc => DOC.run()?,
        Commands::Build => BUILD.run()?,
    }

    Ok(())
}
