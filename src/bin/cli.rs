//! climatectl CLI - Command-line interface
//!
//! Queries and drives SIMSERV climate chambers for scripting and headless
//! operation.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use climatectl_core::cli::{emit, print_exit_codes, CliResult, ExitCodes, OutputFormat};
use climatectl_core::config::{self, AppConfig, ChamberConfig, ConfigError, LoggingConfig};
use climatectl_core::core::chamber::{Chamber, Outcome};
use climatectl_core::core::cycle::{CycleProgram, Step, StepKind, ThermalCycleController};
use climatectl_core::core::lock::{LockError, ProgramLock};
use climatectl_core::core::transport::{TcpConfig, Transport};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// How long a forced takeover waits for the previous holder to exit
const TERMINATE_WAIT: Duration = Duration::from_secs(10);

/// climatectl CLI
#[derive(Parser, Debug)]
#[command(
    name = "climatectl",
    version,
    about = "Climate chamber control over SIMSERV",
    long_about = None
)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, env = "CLIMATECTL_CONFIG")]
    config: Option<PathBuf>,

    /// Configured chamber to use
    #[arg(short, long, global = true)]
    chamber: Option<String>,

    /// Chamber address, overrides the configuration
    #[arg(short, long, global = true)]
    address: Option<String>,

    /// SIMSERV port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Chamber id
    #[arg(long, global = true)]
    id: Option<u32>,

    /// Temperature tolerance [C]
    #[arg(long, global = true)]
    tolerance: Option<f64>,

    /// Poll interval while ramping [s]
    #[arg(long, global = true)]
    refresh: Option<f64>,

    /// Verbose output (frame dumps)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Act even if the chamber is busy or locked
    #[arg(short, long, global = true)]
    force: bool,

    /// Output format
    #[arg(long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show status, temperatures and running program
    Status,

    /// Read actual and nominal temperature
    GetTemp,

    /// Set the nominal temperature and start the chamber
    #[command(allow_negative_numbers = true)]
    SetTemp {
        /// Nominal temperature [C]
        value: f64,
    },

    /// Read a digital channel
    GetChannel {
        /// Channel number
        channel: u32,
    },

    /// Write a digital channel
    SetChannel {
        /// Channel number
        channel: u32,
        /// Value (0 or 1)
        value: u32,
    },

    /// Switch the dry-air supply
    DryAir {
        #[arg(value_enum)]
        action: DryAirAction,
    },

    /// Start the chamber
    Start,

    /// Stop the chamber
    Stop,

    /// Send a raw command
    Command {
        /// Command code followed by its arguments
        #[arg(required = true, num_args = 2.., allow_hyphen_values = true)]
        fields: Vec<String>,
    },

    /// Run a thermal cycling program
    #[command(allow_negative_numbers = true)]
    Cycle {
        /// Use a configured program preset
        #[arg(long, conflicts_with = "cycles")]
        program: Option<String>,

        /// Number of cycles
        #[arg(required_unless_present = "program")]
        cycles: Option<u32>,
        /// Step 1 temperature [C]
        #[arg(required_unless_present = "program")]
        t1: Option<f64>,
        /// Step 1 dwell [min]
        #[arg(required_unless_present = "program")]
        d1: Option<u32>,
        /// Step 2 temperature [C]
        #[arg(required_unless_present = "program")]
        t2: Option<f64>,
        /// Step 2 dwell [min]
        #[arg(required_unless_present = "program")]
        d2: Option<u32>,
        /// Final step temperature [C]
        #[arg(required_unless_present = "program")]
        t3: Option<f64>,
        /// Final step dwell [min], 0 to skip
        #[arg(required_unless_present = "program")]
        d3: Option<u32>,
    },

    /// List configured program presets
    Programs,

    /// Print the exit code table
    ExitCodes,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DryAirAction {
    On,
    Off,
    Status,
}

/// Resolved chamber with command-line overrides applied
struct Target {
    name: String,
    settings: ChamberConfig,
}

impl Target {
    fn resolve(cli: &Cli, config: &AppConfig) -> Result<Self, ConfigError> {
        let (name, mut settings) = match config.chamber(cli.chamber.as_deref())? {
            Some((name, settings)) => (name.to_string(), settings.clone()),
            None => ("default".to_string(), ChamberConfig::default()),
        };

        if let Some(address) = &cli.address {
            settings.address.clone_from(address);
        }
        if let Some(port) = cli.port {
            settings.port = port;
        }
        if let Some(id) = cli.id {
            settings.id = id;
        }
        if let Some(tolerance) = cli.tolerance {
            settings.tolerance = tolerance;
        }
        if let Some(refresh) = cli.refresh {
            settings.refresh_secs = refresh;
        }

        if settings.address.is_empty() {
            return Err(ConfigError::MissingAddress(name));
        }
        Ok(Self { name, settings })
    }

    fn chamber(&self) -> Chamber {
        let tcp = TcpConfig::new(&self.settings.address, self.settings.port)
            .timeout(self.settings.connect_timeout_secs)
            .read_timeout(self.settings.connect_timeout_secs);
        Chamber::with_config(tcp, self.settings.id)
    }

    fn lock_path(&self) -> PathBuf {
        config::lock_file(&format!(
            "{}-{}-{}",
            self.settings.address, self.settings.port, self.settings.id
        ))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match run(&cli).await {
        Ok(result) => result,
        Err(e) => CliResult::from_error(&e),
    };

    match &result {
        CliResult::Success(Some(msg)) => eprintln!("{}", msg),
        CliResult::Error(_, msg) => eprintln!("Error: {}", msg),
        CliResult::Success(None) => {}
    }
    result.to_exit_code()
}

async fn run(cli: &Cli) -> anyhow::Result<CliResult> {
    let config = load_config(cli.config.as_deref())?;
    let _guard = init_logging(cli.verbose, &config.logging)?;

    match &cli.command {
        Commands::Programs => return list_programs(cli, &config),
        Commands::ExitCodes => {
            print_exit_codes();
            return Ok(CliResult::success());
        }
        _ => {}
    }

    let target = Target::resolve(cli, &config)?;
    let chamber = target.chamber();
    tracing::debug!("using chamber {} at {}", target.name, chamber.transport().connection_info());

    match &cli.command {
        Commands::Status => show_status(cli, &target, &chamber).await,
        Commands::GetTemp => {
            let actual = chamber.actual_temperature().await?;
            let nominal = chamber.nominal_temperature().await?;
            emit(
                cli.format,
                &format!("actual: {} C\nnominal: {} C", actual, nominal),
                &serde_json::json!({ "actual": actual, "nominal": nominal }),
            )?;
            Ok(CliResult::success())
        }
        Commands::SetTemp { value } => {
            target.settings.check_temperature(*value)?;
            let _lock = acquire_lock(&target.lock_path(), &format!("set-temp {}", value), cli.force).await?;

            let outcome = chamber.set_nominal_temperature(*value, cli.force).await?;
            if outcome.is_skipped() {
                return report_outcome(cli, "set-temp", &outcome);
            }
            let started = chamber.start(cli.force).await?;
            report_outcome(cli, "set-temp", &started)
        }
        Commands::GetChannel { channel } => {
            let on = chamber.channel(*channel).await?;
            print_channel(cli, *channel, on)
        }
        Commands::SetChannel { channel, value } => {
            let outcome = chamber.set_channel(*channel, *value, cli.force).await?;
            report_outcome(cli, "set-channel", &outcome)
        }
        Commands::DryAir { action } => {
            let channel = target
                .settings
                .dry_air_channel
                .ok_or_else(|| ConfigError::NoDryAirChannel(target.name.clone()))?;
            match action {
                DryAirAction::Status => {
                    let on = chamber.channel(channel).await?;
                    print_channel(cli, channel, on)
                }
                DryAirAction::On | DryAirAction::Off => {
                    let value = u32::from(matches!(action, DryAirAction::On));
                    let outcome = chamber.set_channel(channel, value, cli.force).await?;
                    report_outcome(cli, "dry-air", &outcome)
                }
            }
        }
        Commands::Start => {
            let outcome = chamber.start(cli.force).await?;
            report_outcome(cli, "start", &outcome)
        }
        Commands::Stop => {
            let reply = chamber.stop().await?;
            report_outcome(cli, "stop", &Outcome::Done(reply))
        }
        Commands::Command { fields } => {
            let reply = chamber.send_raw(fields.as_slice()).await?;
            emit(
                cli.format,
                &reply.fields().join(" "),
                &serde_json::json!({ "reply": reply.fields() }),
            )?;
            Ok(CliResult::success())
        }
        Commands::Cycle { program, cycles, t1, d1, t2, d2, t3, d3 } => {
            let program = match program {
                Some(name) => {
                    let mut preset = config.program(name)?.clone();
                    if cli.tolerance.is_some() {
                        preset.tolerance = cli.tolerance;
                    }
                    preset.to_program(target.settings.tolerance, target.settings.refresh_secs)?
                }
                None => CycleProgram::new(
                    cycles.unwrap_or_default(),
                    [
                        Step::new(t1.unwrap_or_default(), d1.unwrap_or_default()),
                        Step::new(t2.unwrap_or_default(), d2.unwrap_or_default()),
                        Step::new(t3.unwrap_or_default(), d3.unwrap_or_default()),
                    ],
                    target.settings.tolerance,
                    target.settings.refresh_secs,
                )?,
            };
            run_cycle(cli, &target, chamber, &program).await
        }
        Commands::Programs | Commands::ExitCodes => Ok(CliResult::success()),
    }
}

fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

fn init_logging(verbose: bool, logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level))
    };

    let (file_layer, guard) = match &logging.file {
        Some(path) => {
            let name = path
                .file_name()
                .with_context(|| format!("invalid log file path {}", path.display()))?;
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::NEVER)
                .filename_prefix(name.to_string_lossy())
                .build(dir)
                .with_context(|| format!("cannot open log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    tracing::debug!("climatectl v{}", climatectl_core::VERSION);
    Ok(guard)
}

async fn acquire_lock(path: &Path, program: &str, force: bool) -> anyhow::Result<ProgramLock> {
    let path = path.to_path_buf();
    let program = program.to_string();
    tokio::task::spawn_blocking(move || take_lock(&path, &program, force))
        .await
        .context("lock task failed")?
}

/// With `force`, a live holder is terminated first; the lock is only broken once it is gone
fn take_lock(path: &Path, program: &str, force: bool) -> anyhow::Result<ProgramLock> {
    match ProgramLock::acquire(path, program) {
        Err(LockError::Held(holder)) if force => {
            if holder.is_alive() {
                tracing::warn!(pid = holder.pid, "terminating running program: {}", holder.program);
                if !holder.terminate(TERMINATE_WAIT) {
                    return Err(LockError::Held(holder).into());
                }
            }
            tracing::warn!("breaking program lock held by PID {} ({})", holder.pid, holder.program);
            ProgramLock::break_stale(path)?;
            Ok(ProgramLock::acquire(path, program)?)
        }
        other => Ok(other?),
    }
}

async fn show_status(cli: &Cli, target: &Target, chamber: &Chamber) -> anyhow::Result<CliResult> {
    let status = chamber.status().await?;
    let actual = chamber.actual_temperature().await?;
    let nominal = chamber.nominal_temperature().await?;
    let holder = ProgramLock::inspect(target.lock_path())?;

    let mut text = format!(
        "chamber: {} ({})\nstatus: {}\navailable: {}\nactual: {} C\nnominal: {} C",
        target.name,
        chamber.session(),
        status,
        if status.is_available() { "yes" } else { "no" },
        actual,
        nominal,
    );
    if let Some(holder) = &holder {
        text.push_str(&format!("\nprogram: {} (PID {})", holder.program, holder.pid));
    }

    emit(
        cli.format,
        &text,
        &serde_json::json!({
            "chamber": target.name,
            "address": chamber.session().address(),
            "port": chamber.session().port(),
            "id": chamber.session().id(),
            "status": status.to_string(),
            "available": status.is_available(),
            "actual": actual,
            "nominal": nominal,
            "program": holder,
        }),
    )?;
    Ok(CliResult::success())
}

fn print_channel(cli: &Cli, channel: u32, on: bool) -> anyhow::Result<CliResult> {
    emit(
        cli.format,
        &format!("channel {}: {}", channel, if on { "on" } else { "off" }),
        &serde_json::json!({ "channel": channel, "on": on }),
    )?;
    Ok(CliResult::success())
}

fn report_outcome(cli: &Cli, action: &str, outcome: &Outcome) -> anyhow::Result<CliResult> {
    let text = match outcome {
        Outcome::Done(reply) => format!("{}: {}", action, reply.status()),
        Outcome::Skipped => format!("{}: skipped, chamber is busy", action),
    };
    emit(
        cli.format,
        &text,
        &serde_json::json!({
            "action": action,
            "skipped": outcome.is_skipped(),
            "reply": outcome.fields(),
        }),
    )?;

    if outcome.is_skipped() {
        return Ok(CliResult::error(
            ExitCodes::DEVICE_BUSY,
            format!("{} skipped; use --force to override", action),
        ));
    }
    Ok(CliResult::success())
}

async fn run_cycle(
    cli: &Cli,
    target: &Target,
    chamber: Chamber,
    program: &CycleProgram,
) -> anyhow::Result<CliResult> {
    for kind in [StepKind::First, StepKind::Second, StepKind::Final] {
        let step = program.step(kind);
        if step.is_active() {
            target.settings.check_temperature(step.temperature)?;
        }
    }

    let _lock = acquire_lock(&target.lock_path(), &format!("cycle {}", program), cli.force).await?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, stopping the chamber");
            interrupt.cancel();
        }
    });

    tracing::info!(
        "running {} on {} ({} min of dwell)",
        program,
        target.name,
        program.total_dwell().as_secs() / 60
    );
    let mut controller = ThermalCycleController::new(chamber);
    let report = controller.cycle(program, cli.force, &cancel).await?;

    let text = if report.skipped {
        "cycle: skipped, chamber is busy".to_string()
    } else {
        format!(
            "cycle: {} cycles completed, {} steps run",
            report.cycles_completed,
            report.steps.len()
        )
    };
    emit(cli.format, &text, &report)?;

    if report.skipped {
        return Ok(CliResult::error(
            ExitCodes::DEVICE_BUSY,
            "cycle skipped; use --force to override",
        ));
    }
    Ok(CliResult::success())
}

fn list_programs(cli: &Cli, config: &AppConfig) -> anyhow::Result<CliResult> {
    let text = if config.programs.is_empty() {
        "No programs configured.".to_string()
    } else {
        config
            .programs
            .iter()
            .map(|(name, p)| {
                format!(
                    "{}: {} cycles, t1={}C i1={}' t2={}C i2={}' t3={}C i3={}'",
                    name, p.cycles, p.temperature_1, p.dwell_1, p.temperature_2, p.dwell_2, p.temperature_3, p.dwell_3
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };
    emit(cli.format, &text, &config.programs)?;
    Ok(CliResult::success())
}
