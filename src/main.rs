use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use covrun::agent::EnvAgentLocator;
use covrun::cli::{Cli, Command};
use covrun::config::ProjectConfig;
use covrun::controller::Controller;
use covrun::harness::LogReporter;
use covrun::launch::{ProcessLauncher, TargetDescriptor};
use covrun::monitored::FsCapabilityBroker;
use covrun::report::CoverageReporter;
use covrun::runlog::{LogEvent, RunLog};
use covrun::signal::{EndSignalReceiver, HardKill, SignalHub};

fn push_kv(output: &mut String, key: &str, value: impl std::fmt::Display) {
    output.push_str(&format!("  {key:<12} {value}\n"));
}

fn config_source_label(config_path: Option<&PathBuf>) -> String {
    config_path
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(defaults — no .covrun/config.toml found)".to_string())
}

fn render_config_human(config: &ProjectConfig, config_path: Option<&PathBuf>) -> String {
    let mut output = String::new();
    output.push_str("Report\n");
    push_kv(&mut output, "output_dir", config.report.output_dir.display());
    output.push('\n');

    output.push_str("Signal\n");
    push_kv(&mut output, "channel", &config.signal.channel);
    output.push('\n');

    output.push_str("Log\n");
    push_kv(&mut output, "dir", config.log.dir.display());
    output.push('\n');

    output.push_str("Source Path\n");
    push_kv(&mut output, "path", config_source_label(config_path));

    output
}

fn render_config_json(config: &ProjectConfig, config_path: Option<&PathBuf>) -> Result<String> {
    let payload = serde_json::json!({
        "report": {
            "output_dir": config.report.output_dir.display().to_string()
        },
        "signal": {
            "channel": &config.signal.channel
        },
        "log": {
            "dir": config.log.dir.display().to_string()
        },
        "source_path": config_source_label(config_path)
    });

    serde_json::to_string_pretty(&payload).context("failed to serialize config to JSON")
}

fn run_target(
    config: &ProjectConfig,
    program: String,
    args: Vec<String>,
    work_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
) -> Result<i32> {
    let output_dir = output_dir.unwrap_or_else(|| config.report.output_dir.clone());
    std::fs::create_dir_all(&output_dir).with_context(|| {
        format!(
            "failed to create coverage directory: {}",
            output_dir.display()
        )
    })?;

    let log_path = config.log.dir.join("run.jsonl");
    let log = Arc::new(RunLog::new(&log_path)?);

    let controller = Arc::new(Controller::new(
        CoverageReporter::new(&output_dir),
        Arc::new(EnvAgentLocator),
        Arc::new(LogReporter),
        Some(log.clone()),
    ));

    let receiver = Arc::new(EndSignalReceiver::new(Arc::new(HardKill)));
    let hub = Arc::new(SignalHub::new());
    hub.register(&config.signal.channel, receiver.clone());

    let work_dir = match work_dir {
        Some(dir) => dir.display().to_string(),
        None => std::env::current_dir()
            .context("failed to get current directory (was it deleted?)")?
            .display()
            .to_string(),
    };
    let descriptor = TargetDescriptor {
        program,
        args,
        work_dir,
        env: vec![],
    };

    let target = controller.start(
        &ProcessLauncher,
        &FsCapabilityBroker::new(&output_dir),
        &receiver,
        &descriptor,
    )?;

    // Bridge Ctrl-C / SIGTERM to the end-test channel. The receiver notifies
    // the controller (synchronous coverage dump) and then hard-kills us.
    let signal_hub = hub.clone();
    let signal_log = log.clone();
    let channel = config.signal.channel.clone();
    ctrlc::set_handler(move || {
        let _ = signal_log.log(LogEvent::EndSignalReceived {
            channel: channel.clone(),
        });
        signal_hub.deliver(&channel);
    })
    .ok();

    let exit_code = target.wait().context("failed to wait for target")?;
    info!(?exit_code, "target exited");
    log.log(LogEvent::TargetExited { exit_code }).ok();

    Ok(exit_code.unwrap_or(0))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let is_config_command = matches!(&cli.command, Command::Config { .. });

    let filter = match cli.verbose {
        0 if is_config_command => "covrun=warn",
        0 => "covrun=info",
        1 => "covrun=debug",
        _ => "covrun=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let cwd = std::env::current_dir().context("failed to get current directory (was it deleted?)")?;
    let (config, config_path) = ProjectConfig::load(&cwd)?;

    if !is_config_command || cli.verbose > 0 {
        match config_path {
            Some(ref p) => info!("loaded config from {}", p.display()),
            None => info!("no .covrun/config.toml found, using defaults"),
        }
    }

    match cli.command {
        Command::Run {
            program,
            args,
            work_dir,
            output_dir,
        } => {
            let code = run_target(&config, program, args, work_dir, output_dir)?;
            if code != 0 {
                warn!(code, "target exited nonzero; coverage was still extracted");
            }
            std::process::exit(code);
        }

        Command::Config { json } => {
            if json {
                println!("{}", render_config_json(&config, config_path.as_ref())?);
            } else {
                print!("{}", render_config_human(&config, config_path.as_ref()));
            }
        }
    }

    Ok(())
}
