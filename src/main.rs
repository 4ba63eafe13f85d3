//! thrustrig - Main Entry Point
//!
//! Runs a measurement session from the terminal. Devices, calibration and
//! acquisition settings come from the JSON configuration; commands are read
//! line by line from stdin.
//!
//! # Usage
//!
//! ```bash
//! thrustrig run --config rig.json
//! thrustrig run --mock
//! thrustrig export --out run.csv
//! thrustrig config
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::BufRead;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thrustrig::config::{self, DEVICE_NAMES};
use thrustrig::{Connector, RigConfig, SerialConnector, Session, SimConnector};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "thrustrig")]
#[command(version, about = "Thrust test-stand acquisition and actuation", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the app data directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an interactive session
    Run {
        /// Use a simulated rig instead of serial hardware
        #[arg(long)]
        mock: bool,
    },

    /// Copy the overflow store of the last run to a file
    Export {
        /// Destination file
        #[arg(long)]
        out: PathBuf,
    },

    /// Print the effective configuration
    Config,
}

/// One line typed at the session prompt
#[derive(Debug, Clone, PartialEq)]
enum ShellCommand {
    Start,
    Stop,
    Set(u32),
    Ramp { peak: u32, step: i32, period: f64 },
    StopRamp,
    Tare,
    Status,
    Save(PathBuf),
    Reset,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  start                       open devices and start sampling
  stop                        stop sampling and park the actuator
  set <pulse>                 hold a pulse width (1000-2000)
  ramp <peak> <step> <period> ramp toward peak on the board
  stopramp                    abort a running ramp
  tare                        re-zero the thrust sensor
  status                      show session state and counters
  save <file>                 export the session as CSV
  reset                       clear collected data (while stopped)
  quit                        stop and exit";

impl ShellCommand {
    fn parse(line: &str) -> std::result::Result<Self, String> {
        let mut parts = line.split_whitespace();
        let Some(word) = parts.next() else {
            return Err(String::new());
        };
        let args: Vec<&str> = parts.collect();

        let arg = |idx: usize, name: &str| -> std::result::Result<String, String> {
            args.get(idx)
                .map(|a| a.to_string())
                .ok_or_else(|| format!("{} needs <{}>", word, name))
        };
        let number = |idx: usize, name: &str| -> std::result::Result<f64, String> {
            arg(idx, name)?
                .parse::<f64>()
                .map_err(|_| format!("<{}> must be a number", name))
        };
        let integer = |idx: usize, name: &str| -> std::result::Result<i64, String> {
            arg(idx, name)?
                .parse::<i64>()
                .map_err(|_| format!("<{}> must be an integer", name))
        };

        match word.to_ascii_lowercase().as_str() {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "set" => {
                let pulse = integer(0, "pulse")?;
                u32::try_from(pulse)
                    .map(Self::Set)
                    .map_err(|_| "<pulse> out of range".to_string())
            }
            "ramp" => {
                let peak = u32::try_from(integer(0, "peak")?).map_err(|_| "<peak> out of range".to_string())?;
                let step = i32::try_from(integer(1, "step")?).map_err(|_| "<step> out of range".to_string())?;
                let period = number(2, "period")?;
                Ok(Self::Ramp { peak, step, period })
            }
            "stopramp" => Ok(Self::StopRamp),
            "tare" => Ok(Self::Tare),
            "status" => Ok(Self::Status),
            "save" => Ok(Self::Save(PathBuf::from(arg(0, "file")?))),
            "reset" => Ok(Self::Reset),
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(format!("unknown command '{}', try 'help'", other)),
        }
    }
}

fn init_logging() -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,thrustrig=debug"));

    let (file_layer, guard) = match config::ensure_app_data_dir() {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir.join("logs"), "thrustrig.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => config::default_config_path().context("Could not determine app data directory"),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging();

    let path = config_path(&cli)?;
    match cli.command {
        Commands::Run { mock } => run(&path, mock),
        Commands::Export { out } => export(&path, &out),
        Commands::Config => show_config(&path),
    }
}

fn run(path: &Path, mock: bool) -> Result<()> {
    let mut config = RigConfig::load_or_default(path);
    tracing::info!("Starting thrustrig with config {:?}", path);

    let connector: Arc<dyn Connector> = if mock {
        for name in DEVICE_NAMES {
            config.set_device_enabled(name, true)?;
        }
        tracing::info!("Using simulated rig");
        Arc::new(SimConnector::simulated_rig(&config))
    } else {
        Arc::new(SerialConnector)
    };

    let mut session = Session::new(config, connector)?;
    println!("{}", HELP);

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read command")?;
        let command = match ShellCommand::parse(&line) {
            Ok(command) => command,
            Err(message) => {
                if !message.is_empty() {
                    println!("{}", message);
                }
                continue;
            }
        };
        if command == ShellCommand::Quit {
            break;
        }
        execute(&mut session, command, path, mock);
    }

    session.stop()?;
    let spilled = session.buffer().archive_remaining()?;
    tracing::info!(
        "Run finished, {} rows kept in {:?}",
        session.buffer().archived(),
        session.buffer().overflow_path()
    );
    tracing::debug!("Spilled {} in-memory rows on exit", spilled);
    Ok(())
}

fn report(result: thrustrig::Result<()>, done: &str) {
    match result {
        Ok(()) => println!("{}", done),
        Err(e) => println!("error: {}", e),
    }
}

fn execute(session: &mut Session, command: ShellCommand, path: &Path, mock: bool) {
    match command {
        ShellCommand::Start => report(session.start(), "started"),
        ShellCommand::Stop => report(session.stop(), "stopped"),
        ShellCommand::Set(pulse) => {
            if !session.set_pwm(pulse) {
                println!("rejected: pulse must be 1000-2000 and no ramp may be running");
            }
        }
        ShellCommand::Ramp { peak, step, period } => {
            if !session.start_ramp(peak, step, period) {
                println!("rejected: a ramp is running or the parameters are invalid");
            }
        }
        ShellCommand::StopRamp => {
            if !session.stop_ramp() {
                println!("no ramp running");
            }
        }
        ShellCommand::Tare => match session.tare_thrust() {
            Ok(offset) => {
                println!("thrust offset {:.3}", offset);
                if !mock {
                    if let Err(e) = session.config().save(path) {
                        println!("error: {}", e);
                    }
                }
            }
            Err(e) => println!("error: {}", e),
        },
        ShellCommand::Status => println!("{}", session.status()),
        ShellCommand::Save(file) => report(session.export_to(&file), "saved"),
        ShellCommand::Reset => report(session.reset(), "reset"),
        ShellCommand::Help => println!("{}", HELP),
        ShellCommand::Quit => {}
    }
}

fn export(path: &Path, out: &Path) -> Result<()> {
    let config = RigConfig::load_or_default(path);
    let source = config.collection.resolved_overflow_path()?;
    let data = std::fs::read(&source).with_context(|| format!("Failed to read {:?}", source))?;
    std::fs::write(out, &data).with_context(|| format!("Failed to write {:?}", out))?;

    let rows = data.iter().filter(|&&b| b == b'\n').count().saturating_sub(1);
    println!("wrote {} rows to {}", rows, out.display());
    Ok(())
}

fn show_config(path: &Path) -> Result<()> {
    let config = RigConfig::load_or_default(path);
    println!("# {}", path.display());
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
