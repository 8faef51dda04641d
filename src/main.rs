use clap::Parser;
use log::{error, info};
use std::path::PathBuf;

use rusty_iec::console::{run_console, ConsoleConfig};
use rusty_iec::line::parse_assignment;
use rusty_iec::system_config::{Machine, MachineFactory};
use rusty_iec::{ConfigError, Source};

#[derive(Parser)]
#[clap(author, about = "Commodore IEC serial bus emulator", long_about = None, version)]
struct Cli {
    /// Machine description (JSON).
    config: PathBuf,
    /// Bus to drive; defaults to the first configured bus.
    #[clap(long)]
    bus: Option<String>,
    /// Comma-separated writes, e.g. "atn=0,clk=0,atn=1".
    #[clap(long)]
    script: Option<String>,
    /// Apply the script as this attached device instead of the host.
    #[clap(long)]
    device: Option<String>,
    /// Open the interactive bus monitor.
    #[clap(long)]
    console: bool,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli) {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let path = cli.config.to_string_lossy();
    let machine = MachineFactory::new().create_from_json(&path)?;
    machine.start()?;
    info!("machine '{}' started", machine.info().name);

    if let Some(script) = &cli.script {
        run_script(&machine, cli.bus.as_deref(), cli.device.as_deref(), script)?;
    } else if cli.console {
        run_console(&machine, ConsoleConfig::default())?;
    } else {
        print_summary(&machine);
    }

    machine.stop();
    Ok(())
}

fn run_script(
    machine: &Machine,
    bus: Option<&str>,
    device: Option<&str>,
    script: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let bus = match bus {
        Some(tag) => machine.bus(tag),
        None => machine.buses().first().cloned(),
    }
    .ok_or("no such bus")?;

    let source = match device {
        Some(tag) => Source::Device(
            bus.find(tag)
                .ok_or_else(|| ConfigError::UnknownDevice(tag.to_string()))?,
        ),
        None => Source::Host,
    };

    println!("{:<10} {}", "start", bus.lines());
    for step in script.split(',').filter(|s| !s.trim().is_empty()) {
        let (line, state) = parse_assignment(step)?;
        bus.set_signal(source, line, state);
        println!("{:<10} {}", step.trim(), bus.lines());
    }
    Ok(())
}

fn print_summary(machine: &Machine) {
    let info = machine.info();
    println!("{} - {}", info.name, info.description);
    for bus in machine.buses() {
        println!("bus '{}': {}", bus.tag(), bus.lines());
        for p in bus.participants() {
            println!("  {:<3} {:<12} {}", p.address, p.tag, p.driven);
        }
    }
}
