mod config;
mod endpoint;
mod liveness;
mod pause;
mod remote;
mod scenario;
mod scripts;
mod sequencer;
mod webdriver;

use std::{
    io::{self, Read},
    path::PathBuf,
};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::{
    fmt::{format::Format as FmtFormat, writer::MakeWriter},
    layer::SubscriberExt,
    EnvFilter,
};
use uuid::Uuid;

use crate::{
    config::{CliOverrides, HarnessConfig, LogFormat},
    endpoint::{GatheringMode, TrackAttachment},
    pause::TokioPause,
    scenario::{run_scenario, ScenarioKind, ScenarioSettings, WebDriverFactory},
    webdriver::BrowserKind,
};

#[derive(Parser, Debug, Default)]
#[command(
    name = "renego-harness",
    version,
    about = "Drives two browsers through an offer/answer renegotiation and checks media flows"
)]
struct Cli {
    #[command(flatten)]
    config: ConfigArgs,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Args, Debug, Default, Clone)]
struct ConfigArgs {
    #[arg(long, global = true)]
    hub_url: Option<String>,
    #[arg(long, global = true)]
    test_page_url: Option<String>,
    /// Browser used by loopback scenarios.
    #[arg(long, global = true)]
    browser: Option<BrowserKind>,
    #[arg(long, global = true)]
    browser_version: Option<String>,
    #[arg(long, global = true)]
    log_format: Option<LogFormat>,
    #[arg(long, global = true)]
    settle_secs: Option<u64>,
    #[arg(long, global = true)]
    gathering: Option<GatheringMode>,
    #[arg(long, global = true)]
    track_attachment: Option<TrackAttachment>,
}

impl ConfigArgs {
    fn into_overrides(self) -> CliOverrides {
        CliOverrides {
            hub_url: self.hub_url,
            test_page_url: self.test_page_url,
            browser: self.browser,
            browser_version: self.browser_version,
            log_format: self.log_format,
            settle_secs: self.settle_secs,
            gathering: self.gathering,
            track_attachment: self.track_attachment,
        }
    }
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run renegotiation scenarios against real browsers (the default).
    Run(RunCommand),
    /// Rewrite an SDP blob into both msid dialects and print it.
    Mangle(MangleCommand),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
enum ScenarioSelection {
    #[default]
    Loopback,
    Interop,
    All,
}

#[derive(Args, Debug, Default)]
struct RunCommand {
    #[arg(long, value_enum, default_value_t)]
    scenario: ScenarioSelection,
    /// Restrict interop runs to one offerer. Requires `--answerer`.
    #[arg(long, requires = "answerer")]
    offerer: Option<BrowserKind>,
    #[arg(long, requires = "offerer")]
    answerer: Option<BrowserKind>,
}

#[derive(Args, Debug)]
struct MangleCommand {
    /// File holding the SDP; reads stdin when omitted.
    path: Option<PathBuf>,
    /// Reject descriptions that lack `v=` or CRLF line endings.
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.config.clone().into_overrides();
    let mut config = HarnessConfig::load()?;
    config.apply_overrides(&overrides)?;

    match cli.command {
        Some(CliCommand::Mangle(cmd)) => mangle(cmd),
        Some(CliCommand::Run(cmd)) => {
            init_tracing(&config);
            run(&config, &cmd).await
        }
        None => {
            init_tracing(&config);
            run(&config, &RunCommand::default()).await
        }
    }
}

fn mangle(cmd: MangleCommand) -> Result<()> {
    let sdp = match &cmd.path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            io::stdin()
                .read_to_string(&mut buffer)
                .context("failed to read stdin")?;
            buffer
        }
    };
    let mangled = if cmd.strict {
        renego_sdp::mangle_strict(&sdp)?
    } else {
        renego_sdp::mangle(&sdp)
    };
    print!("{mangled}");
    Ok(())
}

fn scenarios(config: &HarnessConfig, cmd: &RunCommand) -> Vec<ScenarioKind> {
    let loopback = ScenarioKind::Loopback {
        browser: config.browser,
    };
    let interop = match (cmd.offerer, cmd.answerer) {
        (Some(offerer), Some(answerer)) => vec![ScenarioKind::Interop { offerer, answerer }],
        _ => ScenarioKind::interop_matrix(),
    };
    match cmd.scenario {
        ScenarioSelection::Loopback => vec![loopback],
        ScenarioSelection::Interop => interop,
        ScenarioSelection::All => std::iter::once(loopback).chain(interop).collect(),
    }
}

async fn run(config: &HarnessConfig, cmd: &RunCommand) -> Result<()> {
    let factory = WebDriverFactory::from_config(config)?;
    let settings = ScenarioSettings::from_config(config);
    let pause = TokioPause;
    let kinds = scenarios(config, cmd);

    let hub = if config.uses_grid() {
        "grid tunnel"
    } else {
        config.hub_url.as_str()
    };
    info!(
        hub,
        scenarios = kinds.len(),
        "starting renegotiation run"
    );

    let runs = kinds.iter().map(|&kind| {
        let span = info_span!("scenario", id = %Uuid::new_v4(), %kind);
        let factory = &factory;
        let settings = &settings;
        let pause = &pause;
        async move {
            match run_scenario(factory, pause, settings, kind).await {
                Ok(outcome) => {
                    info!(
                        deliveries = outcome.report.deliveries.len(),
                        luma = outcome.verdict.sample.luma,
                        "scenario passed"
                    );
                    true
                }
                Err(err) => {
                    error!(error = %err, "scenario failed");
                    false
                }
            }
        }
        .instrument(span)
    });

    let results = join_all(runs).await;
    let failed = results.iter().filter(|passed| !**passed).count();
    if failed > 0 {
        bail!("{failed} of {} scenarios failed", results.len());
    }
    info!(scenarios = results.len(), "all scenarios passed");
    Ok(())
}

fn init_tracing(config: &HarnessConfig) {
    // Respect RUST_LOG if set, otherwise default to info for our crates.
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,renego_harness=info,renego=info"));

    let json = matches!(config.log_format(), LogFormat::Json);
    let subscriber = build_subscriber(json, env_filter);

    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {err}");
    }
}

fn build_subscriber(json: bool, env_filter: EnvFilter) -> Box<dyn tracing::Subscriber + Send + Sync> {
    build_subscriber_with_writer(json, env_filter, io::stderr)
}

fn build_subscriber_with_writer<W>(
    json: bool,
    env_filter: EnvFilter,
    make_writer: W,
) -> Box<dyn tracing::Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    if json {
        let format = FmtFormat::default()
            .with_target(true)
            .with_level(true)
            .json();
        Box::new(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .event_format(format)
                    .with_writer(make_writer),
            ),
        )
    } else {
        let format = FmtFormat::default()
            .with_target(true)
            .with_level(true)
            .compact();
        Box::new(
            tracing_subscriber::registry().with(env_filter).with(
                tracing_subscriber::fmt::layer()
                    .event_format(format)
                    .with_writer(make_writer),
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::Write,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing::info;

    use super::*;

    #[derive(Clone, Default)]
    struct CaptureWriter {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl CaptureWriter {
        fn contents(&self) -> String {
            let data = self.buffer.lock().expect("lock");
            String::from_utf8_lossy(&data).to_string()
        }
    }

    struct CaptureHandle {
        buffer: Arc<Mutex<Vec<u8>>>,
    }

    impl<'a> MakeWriter<'a> for CaptureWriter {
        type Writer = CaptureHandle;

        fn make_writer(&'a self) -> Self::Writer {
            CaptureHandle {
                buffer: self.buffer.clone(),
            }
        }
    }

    impl Write for CaptureHandle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            let mut guard = self.buffer.lock().expect("lock");
            guard.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn build_subscriber_emits_expected_formats() {
        let json_writer = CaptureWriter::default();
        let json_subscriber =
            build_subscriber_with_writer(true, EnvFilter::new("info"), json_writer.clone());
        tracing::subscriber::with_default(json_subscriber, || {
            info!(message = "json-output");
        });
        assert!(json_writer.contents().contains("\"message\":\"json-output\""));

        let compact_writer = CaptureWriter::default();
        let compact_subscriber =
            build_subscriber_with_writer(false, EnvFilter::new("info"), compact_writer.clone());
        tracing::subscriber::with_default(compact_subscriber, || {
            info!("compact-output");
        });
        let compact_output = compact_writer.contents();
        assert!(compact_output.contains("compact-output"));
        assert!(!compact_output.contains("\"compact-output\""));
    }

    #[test]
    #[serial]
    fn init_tracing_tolerates_multiple_invocations() {
        let config = HarnessConfig::default();
        init_tracing(&config);
        init_tracing(&config);
    }

    #[test]
    fn run_is_the_default_command() {
        let cli = Cli::parse_from(["renego-harness", "--browser", "firefox"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.config.browser, Some(BrowserKind::Firefox));

        let config = HarnessConfig {
            browser: BrowserKind::Firefox,
            ..HarnessConfig::default()
        };
        assert_eq!(
            scenarios(&config, &RunCommand::default()),
            vec![ScenarioKind::Loopback {
                browser: BrowserKind::Firefox
            }]
        );
    }

    #[test]
    fn cli_overrides_convert_and_apply() {
        let cli = Cli::parse_from([
            "renego-harness",
            "run",
            "--hub-url",
            "http://selenium:4444/wd/hub",
            "--log-format",
            "json",
            "--settle-secs",
            "5",
            "--gathering",
            "complete",
            "--track-attachment",
            "separate_stream",
        ]);
        let mut config = HarnessConfig::default();
        config
            .apply_overrides(&cli.config.into_overrides())
            .expect("overrides apply");

        assert_eq!(config.hub_url, "http://selenium:4444/wd/hub");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.settle_secs, 5);
        assert_eq!(config.gathering, GatheringMode::Complete);
        assert_eq!(config.track_attachment, Some(TrackAttachment::SeparateStream));
    }

    #[test]
    fn interop_selection_expands_to_the_matrix_or_one_pair() {
        let config = HarnessConfig::default();
        let cli = Cli::parse_from(["renego-harness", "run", "--scenario", "interop"]);
        let Some(CliCommand::Run(cmd)) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(scenarios(&config, &cmd), ScenarioKind::interop_matrix());

        let cli = Cli::parse_from([
            "renego-harness",
            "run",
            "--scenario",
            "all",
            "--offerer",
            "chrome",
            "--answerer",
            "firefox",
        ]);
        let Some(CliCommand::Run(cmd)) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(
            scenarios(&config, &cmd),
            vec![
                ScenarioKind::Loopback {
                    browser: BrowserKind::Chrome
                },
                ScenarioKind::Interop {
                    offerer: BrowserKind::Chrome,
                    answerer: BrowserKind::Firefox
                },
            ]
        );
    }

    #[test]
    fn offerer_without_answerer_is_rejected() {
        let result = Cli::try_parse_from(["renego-harness", "run", "--offerer", "chrome"]);
        assert!(result.is_err());
    }

    #[test]
    fn mangle_reads_from_a_file() {
        let path = std::env::temp_dir().join(format!("renego-{}.sdp", Uuid::new_v4()));
        std::fs::write(&path, "v=0\r\nm=audio 9 RTP/AVP 0\r\na=ssrc:1 msid:s t\r\n")
            .expect("write sdp");
        let cmd = MangleCommand {
            path: Some(path.clone()),
            strict: true,
        };
        mangle(cmd).expect("mangles");
        std::fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn strict_mangle_rejects_bare_newlines() {
        let path = std::env::temp_dir().join(format!("renego-{}.sdp", Uuid::new_v4()));
        std::fs::write(&path, "v=0\nm=audio 9 RTP/AVP 0\n").expect("write sdp");
        let err = mangle(MangleCommand {
            path: Some(path.clone()),
            strict: true,
        })
        .unwrap_err();
        assert!(err.downcast_ref::<renego_sdp::SdpError>().is_some());
        std::fs::remove_file(path).expect("cleanup");
    }
}
