use clap::{Parser, Subcommand};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::{exit, Command};
use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(author, version, about = "Developer tasks for the renegotiation harness")]
struct Cli {
    #[command(subcommand)]
    command: Task,
}

#[derive(Subcommand)]
enum Task {
    #[command(about = "Run `cargo fmt --all`")]
    Fmt,
    #[command(about = "Run format + clippy lint checks")]
    Lint,
    #[command(about = "Execute `cargo test --workspace`")]
    Test,
    #[command(about = "Run fmt + clippy + test sequence")]
    Ci,
    #[command(about = "Wait for a WebDriver hub, then run every harness scenario against it")]
    Interop {
        #[arg(long, default_value = "http://localhost:4444")]
        hub_url: String,
        #[arg(long, default_value_t = 60)]
        wait_secs: u64,
    },
}

fn main() {
    let cli = Cli::parse();

    let workspace_root = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .map(|p| p.to_path_buf())
        .expect("workspace root");

    let result = match cli.command {
        Task::Fmt => run_commands(&workspace_root, [("cargo", &["fmt", "--all"])]),
        Task::Lint => run_commands(
            &workspace_root,
            [
                ("cargo", &["fmt", "--all", "--", "--check"]),
                ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
            ],
        ),
        Task::Test => run_commands(&workspace_root, [("cargo", &["test", "--workspace"])]),
        Task::Ci => run_ci(&workspace_root),
        Task::Interop { hub_url, wait_secs } => {
            run_interop(&workspace_root, &hub_url, Duration::from_secs(wait_secs))
        }
    };

    if !result {
        exit(1);
    }
}

fn run_ci(workspace_root: &Path) -> bool {
    if !run_commands(
        workspace_root,
        [
            ("cargo", &["fmt", "--all", "--", "--check"]),
            ("cargo", &["clippy", "--workspace", "--", "-D", "warnings"]),
        ],
    ) {
        return false;
    }
    run_commands(workspace_root, [("cargo", &["test", "--workspace"])])
}

fn run_interop(workspace_root: &Path, hub_url: &str, wait: Duration) -> bool {
    let client = match Client::builder().timeout(Duration::from_secs(5)).build() {
        Ok(client) => client,
        Err(err) => {
            eprintln!("failed to build HTTP client: {err}");
            return false;
        }
    };

    let status_url = format!("{}/status", hub_url.trim_end_matches('/'));
    if !wait_for_hub(&client, &status_url, wait) {
        eprintln!("hub at {hub_url} did not report ready within {wait:?}");
        return false;
    }

    run_commands(
        workspace_root,
        [(
            "cargo",
            &[
                "run",
                "--quiet",
                "-p",
                "renego-harness",
                "--",
                "run",
                "--scenario",
                "all",
                "--hub-url",
                hub_url,
            ],
        )],
    )
}

#[derive(Deserialize)]
struct HubStatus {
    value: HubReadiness,
}

#[derive(Deserialize)]
struct HubReadiness {
    #[serde(default)]
    ready: bool,
    #[serde(default)]
    message: String,
}

fn wait_for_hub(client: &Client, url: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match client.get(url).send().and_then(|r| r.json::<HubStatus>()) {
            Ok(status) if status.value.ready => return true,
            Ok(status) => eprintln!("hub not ready yet: {}", status.value.message),
            Err(_) => {}
        }
        sleep(Duration::from_millis(500));
    }
    false
}

fn run_commands<const N: usize>(workspace_root: &Path, commands: [(&str, &[&str]); N]) -> bool {
    for (program, args) in commands {
        let status = Command::new(program)
            .args(args)
            .current_dir(workspace_root)
            .status();

        match status {
            Ok(status) if status.success() => {}
            Ok(status) => {
                eprintln!("command '{program} {}' failed with {status}", args.join(" "));
                return false;
            }
            Err(err) => {
                eprintln!("failed to spawn '{program}': {err}");
                return false;
            }
        }
    }
    true
}
