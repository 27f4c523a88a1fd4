//! Helpers for running clients against a simulated device on the loopback interface.
use std::{
    error::Error,
    io,
    net::{SocketAddr, UdpSocket},
    sync::Arc,
    thread::JoinHandle,
    time::Duration,
};

use leep_client::{
    LeepDevice,
    acquire::AcqConfig,
    config::{Builder, Config},
};
use leep_sim::{
    RegisterBackend,
    backends::{regfile::RegisterFile, rfs::RfsBackend},
    server::{self, Server},
};
use tokio_util::sync::CancellationToken;

/// Two channel groups with acquisition engines, a sequencer and a few plain registers,
/// one of them write only.
pub const SCHEMA: &str = r#"{
    "circle_buf_flip": {"base_addr": 1, "data_width": 2},
    "llrf_circle_ready": {"base_addr": 2, "data_width": 2, "access": "r"},
    "dac_offset": {"base_addr": 3, "data_width": 16, "access": "w"},
    "shell_0_dsp_chan_keep": {"base_addr": 16, "data_width": 12},
    "shell_0_dsp_tag": {"base_addr": 17, "data_width": 8},
    "shell_0_dsp_wave_samp_per": {"base_addr": 18, "data_width": 8},
    "shell_0_dsp_fdbk_core_mp_proc_lim": {"base_addr": 20, "addr_width": 2, "data_width": 18, "sign": "signed"},
    "shell_0_dsp_fdbk_core_mp_proc_setmp": {"base_addr": 24, "addr_width": 1, "data_width": 18, "sign": "signed"},
    "shell_1_dsp_chan_keep": {"base_addr": 32, "data_width": 12},
    "shell_1_dsp_tag": {"base_addr": 33, "data_width": 8},
    "shell_1_dsp_wave_samp_per": {"base_addr": 34, "data_width": 8},
    "shell_0_dsp_sequencer_program": {"base_addr": 64, "addr_width": 5, "data_width": 24},
    "shell_0_slow_data": {"base_addr": 256, "addr_width": 6, "data_width": 8, "access": "r"},
    "shell_1_slow_data": {"base_addr": 320, "addr_width": 6, "data_width": 8, "access": "r"},
    "lut_table": {"base_addr": 1024, "addr_width": 8, "data_width": 16, "sign": "signed"},
    "shell_0_circle_data": {"base_addr": 4096, "addr_width": 9, "data_width": 18, "sign": "signed", "access": "r"},
    "shell_1_circle_data": {"base_addr": 8192, "addr_width": 9, "data_width": 18, "sign": "signed", "access": "r"}
}"#;

pub const DESCRIPTION: &str = "leep-tests simulated device";

/// A simulator serving on its own thread until dropped.
pub struct Sim<T: RegisterBackend> {
    addr: SocketAddr,
    backend: Arc<T>,
    token: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl<T: RegisterBackend + Send + Sync + 'static> Sim<T> {
    pub fn spawn(backend: T, config: server::Config) -> io::Result<Sim<T>> {
        let socket = UdpSocket::bind("127.0.0.1:0")?;
        socket.set_nonblocking(true)?;
        let addr = socket.local_addr()?;

        let backend = Arc::new(backend);
        let server = Server::new(backend.clone(), config);
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let thread = std::thread::spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    log::error!("Unable to start simulator runtime: {}", err);
                    return;
                }
            };
            runtime.block_on(async move {
                let result = match tokio::net::UdpSocket::from_std(socket) {
                    Ok(socket) => server.serve(socket, cancelled).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = result {
                    log::error!("Simulator failed: {}", err);
                }
            });
        });

        Ok(Sim {
            addr,
            backend,
            token,
            thread: Some(thread),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn uri(&self) -> String {
        format!("leep://{}", self.addr)
    }

    pub fn backend(&self) -> &T {
        &self.backend
    }

    pub fn connect(&self) -> leep_client::Result<LeepDevice> {
        LeepDevice::connect(self.addr, client_config())
    }
}

impl<T: RegisterBackend> Drop for Sim<T> {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Short timeouts and fast polling for tests on the loopback interface.
pub fn client_config() -> Config {
    let acquisition = AcqConfig {
        poll_interval: Duration::from_millis(5),
        ..AcqConfig::default()
    };
    Builder::new()
        .timeout(Duration::from_millis(500))
        .acquisition(acquisition)
        .build()
}

/// A plain register file for [`SCHEMA`].
pub fn regfile_sim() -> Result<Sim<RegisterFile>, Box<dyn Error>> {
    let regs = RegisterFile::from_json(SCHEMA, DESCRIPTION)?;
    Ok(Sim::spawn(regs, server::Config::default())?)
}

/// The acquisition model for [`SCHEMA`], capturing every `tick` when given.
pub fn rfs_sim(tick: Option<Duration>) -> Result<Sim<RfsBackend>, Box<dyn Error>> {
    let regs = RegisterFile::from_json(SCHEMA, DESCRIPTION)?;
    let config = server::Config {
        tick,
        ..server::Config::default()
    };
    Ok(Sim::spawn(RfsBackend::new(regs)?, config)?)
}
