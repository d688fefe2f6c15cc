//! Build automation tasks for the wifi-portal project.
//!
//! Run with: `cargo xtask <command>`

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use std::process::{Command, ExitCode};

#[derive(Parser)]
#[command(name = "xtask")]
#[command(about = "Build automation for wifi-portal", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: host tests, device library builds, the demo, docs
    CheckAll,
    /// Run the host test suite (unit and integration tests)
    Test,
    /// Build library with specified features
    Build {
        #[arg(long, default_value = "pico2")]
        board: Board,
        #[arg(long)]
        wifi: bool,
    },
    /// Build UF2 firmware file for flashing to Pico
    Uf2 {
        /// Demo name (e.g., provision)
        name: String,
        #[arg(long, default_value = "pico2")]
        board: Board,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum Board {
    Pico1,
    Pico2,
}

impl Board {
    fn target(self) -> &'static str {
        match self {
            Board::Pico1 => "thumbv6m-none-eabi",
            Board::Pico2 => "thumbv8m.main-none-eabihf",
        }
    }
}

impl std::fmt::Display for Board {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Board::Pico1 => write!(f, "pico1"),
            Board::Pico2 => write!(f, "pico2"),
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckAll => check_all(),
        Commands::Test => run_host_tests(),
        Commands::Build { board, wifi } => build_lib(board, wifi),
        Commands::Uf2 { name, board } => build_uf2(&name, board),
    }
}

fn check_all() -> ExitCode {
    if run_host_tests() == ExitCode::FAILURE {
        return ExitCode::FAILURE;
    }

    let workspace_root = workspace_root();
    let board = Board::Pico2;
    for wifi in [false, true] {
        if build_lib(board, wifi) == ExitCode::FAILURE {
            return ExitCode::FAILURE;
        }
    }

    println!("\n{}", "==> Building demo (pico2, arm, wifi)...".cyan());
    if !run_command(Command::new("cargo").current_dir(&workspace_root).args([
        "build",
        "--example",
        "provision",
        "--target",
        board.target(),
        "--features",
        &device_features(board, true),
        "--no-default-features",
    ])) {
        return ExitCode::FAILURE;
    }

    println!("\n{}", "==> Building documentation...".cyan());
    if !run_command(Command::new("cargo").current_dir(&workspace_root).args([
        "doc",
        "--target",
        board.target(),
        "--no-deps",
        "--features",
        &device_features(board, true),
        "--no-default-features",
    ])) {
        return ExitCode::FAILURE;
    }

    println!("\n{}", "==> All checks passed!".green().bold());
    ExitCode::SUCCESS
}

fn run_host_tests() -> ExitCode {
    println!("{}", "==> Running host tests...".cyan());
    let mut cmd = Command::new("cargo");
    cmd.current_dir(workspace_root()).args(["test"]);

    match host_target() {
        Some(target) => {
            println!("  {}", format!("Using host target: {target}").bright_black());
            cmd.arg("--target").arg(target);
        }
        None => {
            println!(
                "{}",
                "  Unable to detect host target; relying on cargo default.".bright_black()
            );
        }
    }

    if run_command(&mut cmd) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_lib(board: Board, wifi: bool) -> ExitCode {
    let features = device_features(board, wifi);
    println!(
        "{}",
        format!("==> Building library with features: {features}").cyan()
    );

    if run_command(Command::new("cargo").current_dir(workspace_root()).args([
        "build",
        "--lib",
        "--target",
        board.target(),
        "--features",
        &features,
        "--no-default-features",
    ])) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn build_uf2(name: &str, board: Board) -> ExitCode {
    let workspace_root = workspace_root();
    let target = board.target();
    let features = device_features(board, true);

    println!("{}", format!("Building UF2 for demo '{name}' ({board})").cyan());
    println!("  Features: {}", features.bright_black());
    println!("  Target: {}", target.bright_black());

    if !run_command(Command::new("cargo").current_dir(&workspace_root).args([
        "build",
        "--example",
        name,
        "--release",
        "--target",
        target,
        "--features",
        &features,
        "--no-default-features",
    ])) {
        return ExitCode::FAILURE;
    }

    let elf_path = format!("target/{target}/release/examples/{name}");
    let uf2_path = format!("{name}.uf2");

    println!("\n{}", "Converting to UF2 format...".cyan());

    if run_command(
        Command::new("elf2uf2-rs")
            .current_dir(&workspace_root)
            .args([&elf_path, &uf2_path]),
    ) {
        println!("{}", format!("UF2 created: {uf2_path}").green().bold());
        ExitCode::SUCCESS
    } else {
        println!(
            "{}",
            "Note: Install elf2uf2-rs with: cargo install elf2uf2-rs".yellow()
        );
        ExitCode::FAILURE
    }
}

fn device_features(board: Board, wifi: bool) -> String {
    let mut features = vec![board.to_string(), "arm".to_string(), "defmt".to_string()];
    if wifi {
        features.push("wifi".to_string());
    }
    features.join(",")
}

fn workspace_root() -> std::path::PathBuf {
    std::env::current_dir().expect("Failed to get current directory")
}

fn host_target() -> Option<String> {
    let output = Command::new("rustc").arg("-vV").output().ok()?;
    if !output.status.success() {
        return None;
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .find_map(|line| line.strip_prefix("host: "))
        .map(|host| host.trim().to_string())
}

fn run_command(cmd: &mut Command) -> bool {
    match cmd.status() {
        Ok(status) => status.success(),
        Err(e) => {
            eprintln!("{}", format!("Failed to execute command: {e}").red());
            false
        }
    }
}
