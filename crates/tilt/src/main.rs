use std::io::{self, BufRead};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tilt_core::{
    ConfigManager, FileTopology, LogSink, Pinball, StaticTopology, TableElementEvent, Topology,
    TopologySource,
};

/// Drives cabinet feedback hardware from table events read on stdin.
#[derive(Parser, Debug)]
#[command(name = "tilt")]
#[command(about = "Pinball cabinet feedback driver")]
struct Args {
    /// Table file the session is started for
    #[arg(long)]
    table: PathBuf,

    /// ROM name of the table
    #[arg(long, default_value = "")]
    rom: String,

    /// Settings file (defaults to config.json in the config directory)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Use this topology file instead of the table/rom/global lookup
    #[arg(long)]
    topology: Option<PathBuf>,
}

/// One line of bridge input.
#[derive(Debug, PartialEq)]
enum Command {
    Event(TableElementEvent),
    Legacy {
        ledwiz_number: u32,
        address: u32,
        value: i32,
    },
    Pause,
    Continue,
    Run,
    Stop,
    Quit,
}

fn parse_command(line: &str) -> anyhow::Result<Option<Command>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let command = match line.to_ascii_lowercase().as_str() {
        "pause" => Command::Pause,
        "continue" => Command::Continue,
        "run" => Command::Run,
        "stop" => Command::Stop,
        "quit" | "exit" => Command::Quit,
        _ if line.to_ascii_lowercase().starts_with("ledwiz ") => {
            let fields: Vec<&str> = line.split_whitespace().skip(1).collect();
            let [number, address, value] = fields.as_slice() else {
                anyhow::bail!("expected 'ledwiz <number> <address> <value>', got '{}'", line);
            };
            Command::Legacy {
                ledwiz_number: number.parse().context("invalid LedWiz number")?,
                address: address.parse().context("invalid address")?,
                value: value.parse().context("invalid value")?,
            }
        }
        _ => Command::Event(line.parse()?),
    };
    Ok(Some(command))
}

fn main() -> Result<(), anyhow::Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let mut config = ConfigManager::new(args.config.clone());
    let settings = config.load()?;
    log::info!("Settings loaded from {}", config.config_path().display());

    let source: Box<dyn TopologySource> = match &args.topology {
        Some(path) => Box::new(StaticTopology(Topology::load(path)?)),
        None => Box::new(FileTopology::new(settings.config_dir())),
    };

    let mut pinball = Pinball::new(source, Arc::new(LogSink), settings);
    pinball.init(&args.table, &args.rom)?;

    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_command(&line) {
            Ok(Some(Command::Event(event))) => pinball.receive_event(event),
            Ok(Some(Command::Legacy {
                ledwiz_number,
                address,
                value,
            })) => pinball.set_legacy_output(ledwiz_number, address, value),
            Ok(Some(Command::Pause)) => pinball.pause(),
            Ok(Some(Command::Continue)) => pinball.resume(),
            Ok(Some(Command::Run)) => pinball.run(),
            Ok(Some(Command::Stop)) => pinball.stop(),
            Ok(Some(Command::Quit)) => break,
            Ok(None) => {}
            Err(e) => log::warn!("Skipping input line: {:#}", e),
        }
    }

    pinball.finish();
    Ok(())
}
