use std::path::PathBuf;

use anyhow::{Context, Result};
use blindsync::alarm::NextAlarmLabels;
use blindsync::device::DeviceConfig;
use blindsync::emulator::{DeviceEmulator, EmulatorConfig};
use blindsync::settings::{ClientSettings, SettingsOverrides, load_settings};
use blindsync::sync::wire::LogEntry;
use blindsync::sync::{ConfigSyncClient, HttpTransport};
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliLang {
    #[value(name = "pt-br")]
    PtBr,
    En,
}

impl From<CliLang> for NextAlarmLabels {
    fn from(value: CliLang) -> Self {
        match value {
            CliLang::PtBr => NextAlarmLabels::PT_BR,
            CliLang::En => NextAlarmLabels::EN,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "blindsync",
    version,
    about = "Manage the alarms and light threshold of a smart blind controller"
)]
struct Cli {
    /// Versioned JSON settings file.
    #[arg(long, env = "BLINDSYNC_SETTINGS")]
    settings: Option<PathBuf>,

    #[arg(long, env = "BLINDSYNC_BASE_URL")]
    base_url: Option<String>,

    #[arg(long = "device", env = "BLINDSYNC_DEVICE")]
    device_id: Option<String>,

    #[arg(long, env = "BLINDSYNC_TIMEOUT_MS")]
    timeout_ms: Option<u64>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the configuration stored for the device.
    Show,
    /// Print the next alarm that will fire.
    Next {
        #[arg(long, value_enum, default_value_t = CliLang::PtBr)]
        lang: CliLang,
    },
    /// Add an alarm (HH:MM) and save it.
    Add { time: String },
    /// Remove an alarm (HH:MM) and save the result.
    Remove { time: String },
    /// Set the light threshold, clamped to 0..=4095.
    Threshold {
        #[arg(allow_negative_numbers = true)]
        value: i64,
    },
    /// Print recent device history, newest first.
    Logs {
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Serve an in-memory device API until interrupted.
    Emulate {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 3000)]
        port: u16,
    },
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Command::Emulate { bind, port } = &cli.command {
        return run_emulator(EmulatorConfig {
            bind_addr: bind.clone(),
            port: *port,
        });
    }

    let settings = resolve_settings(&cli)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?;
    runtime.block_on(run_command(settings, cli.command))
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "blindsync=debug" } else { "blindsync=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_settings(cli: &Cli) -> Result<ClientSettings> {
    let base = match &cli.settings {
        Some(path) => load_settings(path)?,
        None => ClientSettings::default(),
    };
    base.apply(SettingsOverrides {
        base_url: cli
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string()),
        device_id: cli.device_id.clone(),
        timeout_ms: cli.timeout_ms,
        log_limit: None,
    })
    .context("invalid client settings")
}

fn run_emulator(config: EmulatorConfig) -> Result<()> {
    let emulator = DeviceEmulator::start(config)?;
    info!(addr = %emulator.local_addr(), "device emulator listening");
    println!("device emulator listening on {}", emulator.base_url());
    emulator.wait();
    Ok(())
}

async fn run_command(settings: ClientSettings, command: Command) -> Result<()> {
    let transport = HttpTransport::new(settings.base_url.clone(), settings.timeout())?;
    let client = ConfigSyncClient::new(transport, settings.device_id.clone());

    match command {
        Command::Show => {
            let config = client.load().await?;
            print_config(&config);
        }
        Command::Next { lang } => {
            client.load().await?;
            let labels = NextAlarmLabels::from(lang);
            println!(
                "{}",
                client.next_alarm_description(&Local::now().time(), &labels)
            );
        }
        Command::Add { time } => {
            client.load().await?;
            let config = client.add_alarm(&time).await?;
            print_config(&config);
        }
        Command::Remove { time } => {
            client.load().await?;
            let config = client.remove_alarm(&time).await?;
            print_config(&config);
        }
        Command::Threshold { value } => {
            client.load().await?;
            client.stage_threshold(value)?;
            let config = client
                .save_threshold()
                .await
                .context("light threshold was not saved")?;
            print_config(&config);
        }
        Command::Logs { limit } => {
            let limit = limit.unwrap_or(settings.log_limit);
            let logs = client.fetch_logs(limit).await?;
            if logs.is_empty() {
                println!("no history recorded");
            }
            for entry in &logs {
                println!("{}", format_log_entry(entry));
            }
        }
        Command::Emulate { .. } => unreachable!("handled before the runtime starts"),
    }
    Ok(())
}

fn print_config(config: &DeviceConfig) {
    println!("device: {}", config.device_id());
    if config.alarms().is_empty() {
        println!("alarms: none");
    } else {
        println!("alarms: {}", config.alarms().to_wire().join(", "));
    }
    println!("light threshold: {}", config.light_threshold());
    if let Some(updated_at) = config.updated_at() {
        println!("updated at: {}", updated_at.to_rfc3339());
    }
}

fn format_log_entry(entry: &LogEntry) -> String {
    format!(
        "{}  light={:<4}  alarm={}  blind={}",
        entry.timestamp.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S"),
        entry.light,
        if entry.alarm_triggered { "yes" } else { "no" },
        if entry.servo_opened { "open" } else { "closed" },
    )
}
