//! # LEEP Command Line Client
//!
//! Reads and writes registers of a LEEP device by name, and exports its register map.
//!
//! ```text
//! leep leep://192.168.1.10 reg shell_0_dsp_tag dsp_chan_keep=0xc00 -i 0
//! leep leep://192.168.1.10 dump -Z
//! leep leep://192.168.1.10 template feed.substitutions
//! ```
use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use leep_cli::commands::{self, RegArg};
use leep_client::{config::Builder, regmap::Token, registry};

#[derive(Subcommand)]
enum Command {
    /// Read and write registers
    Reg {
        #[arg(short, long = "inst", help = "Instance token, may be repeated")]
        inst: Vec<Token>,
        #[arg(required = true, help = "register[=newvalue]")]
        reg: Vec<RegArg>,
    },
    /// List register names
    List,
    /// Dump the contents of all readable registers
    Dump {
        #[arg(short = 'Z', long, help = "Only print registers with non-zero values")]
        ignore_zeros: bool,
    },
    /// Print the register map JSON as stored in the device ROM
    Json,
    /// Generate an MSI substitutions file
    Template { output: PathBuf },
}

fn parse_seconds(s: &str) -> Result<Duration, String> {
    let seconds: f64 = s.parse().map_err(|err| format!("{}", err))?;
    Duration::try_from_secs_f64(seconds).map_err(|err| format!("{}", err))
}

#[derive(Parser)]
#[command(about = "Register access for LEEP devices", long_about = None)]
struct Args {
    #[arg(
        short,
        long,
        default_value = "1.0",
        value_parser = parse_seconds,
        help = "Reply timeout in seconds"
    )]
    timeout: Duration,

    #[arg(short, long, conflicts_with = "quiet")]
    debug: bool,

    #[arg(short, long)]
    quiet: bool,

    #[arg(value_name = "URI", help = "Device address, ca://prefix or leep://host[:port]")]
    dest: String,

    #[clap(subcommand)]
    command: Command,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let level = if args.debug {
        "debug"
    } else if args.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = Builder::new().timeout(args.timeout).build();
    log::debug!("Opening {} with timeout {:?}", args.dest, config.timeout);
    let mut dev = registry::open(&args.dest, config)?;

    let mut out = io::stdout().lock();
    match args.command {
        Command::Reg { inst, reg } => commands::readwrite(dev.as_mut(), &reg, &inst, &mut out)?,
        Command::List => commands::list(dev.register_map().schema(), &mut out)?,
        Command::Dump { ignore_zeros } => commands::dump(dev.as_mut(), ignore_zeros, &mut out)?,
        Command::Json => writeln!(out, "{}", commands::json(dev.as_ref()))?,
        Command::Template { output } => {
            let text = commands::template(dev.register_map().schema(), dev.rom_info());
            std::fs::write(&output, text)?;
            log::info!("Wrote {}", output.display());
        }
    }
    dev.close()?;
    Ok(())
}
