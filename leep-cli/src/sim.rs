//! # LEEP Device Simulator
//!
//! Serves the registers of a JSON register map over UDP. When the map contains the
//! waveform acquisition registers, captures are modelled as well.
use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use env_logger::Env;
use leep_protocol::DEFAULT_PORT;
use leep_sim::{
    backends::{regfile::RegisterFile, rfs::RfsBackend},
    server::Builder,
};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(about = "Simulated LEEP device serving a JSON register map", long_about = None)]
struct Args {
    #[arg(help = "JSON register map")]
    schema: PathBuf,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[arg(long, default_value = "leep-sim", help = "Description stored in the ROM")]
    description: String,

    #[arg(long, help = "Capture waveforms every given number of milliseconds")]
    tick_ms: Option<u64>,

    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let json = std::fs::read_to_string(&args.schema)?;
    let regs = RegisterFile::from_json(&json, &args.description)?;
    log::info!(
        "Loaded {} registers from {}",
        regs.schema().len(),
        args.schema.display()
    );

    let mut builder = Builder::new();
    if let Some(ms) = args.tick_ms {
        builder = builder.tick(Duration::from_millis(ms));
    }

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("Received Ctrl-C, shutting down");
                shutdown.cancel();
            }
            Err(err) => log::error!("Unable to listen for Ctrl-C: {}", err),
        }
    });

    let addr = SocketAddr::new(args.ip, args.port);
    let acquisition = ["circle_buf_flip", "llrf_circle_ready"]
        .iter()
        .all(|name| regs.schema().contains(name));
    if acquisition {
        let server = builder.build(RfsBackend::new(regs)?);
        server.listen(addr, token).await?;
    } else {
        let server = builder.build(regs);
        server.listen(addr, token).await?;
    }
    Ok(())
}
