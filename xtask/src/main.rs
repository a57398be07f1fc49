//! Build automation for the pgcore workspace.
//!
//! Run with `cargo xtask <command>`.
//!
//! ## Commands
//!
//! - `ci`: format check, clippy and tests
//! - `fmt`: check or apply formatting
//! - `clippy`: lint every target
//! - `test`: run tests, optionally for one crate
//! - `doc`: build API docs
//! - `bench`: run the criterion benchmarks
//! - `coverage`: collect coverage with cargo-llvm-cov
//! - `package`: verify every publishable crate packages
//! - `clean`: remove build artifacts

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

/// Crates published from this workspace, in dependency order.
const PUBLISHED: &[&str] = &["pg-protocol", "pg-types", "pg-io", "pg-codec", "pg-client"];

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for pgcore")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run format, lint and test checks
    Ci,
    /// Run cargo fmt (--check unless --fix)
    Fmt {
        /// Apply formatting
        #[arg(long)]
        fix: bool,
    },
    /// Run clippy on all targets
    Clippy {
        /// Apply suggestions
        #[arg(long)]
        fix: bool,
    },
    /// Run tests
    Test {
        /// Only test this package
        #[arg(short, long)]
        package: Option<String>,
        /// Skip doctests
        #[arg(long)]
        no_doc: bool,
    },
    /// Build documentation
    Doc {
        /// Open in a browser
        #[arg(long)]
        open: bool,
    },
    /// Run benchmarks
    Bench {
        /// Benchmark filter
        filter: Option<String>,
    },
    /// Collect coverage (requires cargo-llvm-cov)
    Coverage {
        /// html or lcov
        #[arg(long, default_value = "html")]
        format: String,
    },
    /// Check that publishable crates package cleanly
    Package,
    /// Clean build artifacts
    Clean,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;
    sh.change_dir(workspace_root()?);

    match cli.command {
        Command::Ci => {
            fmt(&sh, false)?;
            clippy(&sh, false)?;
            test(&sh, None, false)?;
            println!("\n✅ CI checks passed");
        }
        Command::Fmt { fix } => fmt(&sh, fix)?,
        Command::Clippy { fix } => clippy(&sh, fix)?,
        Command::Test { package, no_doc } => test(&sh, package.as_deref(), no_doc)?,
        Command::Doc { open } => doc(&sh, open)?,
        Command::Bench { filter } => bench(&sh, filter.as_deref())?,
        Command::Coverage { format } => coverage(&sh, &format)?,
        Command::Package => package(&sh)?,
        Command::Clean => cmd!(sh, "cargo clean").run()?,
    }
    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;
    let manifest = String::from_utf8(output.stdout).context("invalid UTF-8 from cargo")?;
    Ok(PathBuf::from(manifest.trim())
        .parent()
        .context("manifest path has no parent")?
        .to_path_buf())
}

fn fmt(sh: &Shell, fix: bool) -> Result<()> {
    if fix {
        cmd!(sh, "cargo fmt --all").run()?;
    } else {
        println!("Checking formatting...");
        cmd!(sh, "cargo fmt --all -- --check").run()?;
    }
    Ok(())
}

fn clippy(sh: &Shell, fix: bool) -> Result<()> {
    println!("Running clippy...");
    if fix {
        cmd!(sh, "cargo clippy --workspace --all-targets --fix --allow-dirty").run()?;
    } else {
        cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    }
    Ok(())
}

fn test(sh: &Shell, package: Option<&str>, no_doc: bool) -> Result<()> {
    println!("Running tests...");
    let mut args = vec!["--workspace"];
    if let Some(package) = package {
        args = vec!["-p", package];
    }
    if no_doc {
        args.extend(["--lib", "--bins", "--tests"]);
    }
    cmd!(sh, "cargo test {args...}").run()?;
    Ok(())
}

fn doc(sh: &Shell, open: bool) -> Result<()> {
    let open = open.then_some("--open");
    cmd!(sh, "cargo doc --workspace --no-deps {open...}")
        .env("RUSTDOCFLAGS", "-D warnings")
        .run()?;
    Ok(())
}

fn bench(sh: &Shell, filter: Option<&str>) -> Result<()> {
    match filter {
        Some(filter) => cmd!(sh, "cargo bench --workspace -- {filter}").run()?,
        None => cmd!(sh, "cargo bench --workspace").run()?,
    }
    Ok(())
}

fn coverage(sh: &Shell, format: &str) -> Result<()> {
    match format {
        "html" => {
            cmd!(sh, "cargo llvm-cov --workspace --html").run()?;
            println!("Report: target/llvm-cov/html/index.html");
        }
        "lcov" => {
            cmd!(sh, "cargo llvm-cov --workspace --lcov --output-path target/lcov.info").run()?;
            println!("Report: target/lcov.info");
        }
        other => bail!("unknown coverage format {other}, expected html or lcov"),
    }
    Ok(())
}

fn package(sh: &Shell) -> Result<()> {
    for name in PUBLISHED {
        println!("Packaging {name}...");
        cmd!(sh, "cargo package -p {name} --allow-dirty --no-verify").run()?;
    }
    Ok(())
}
