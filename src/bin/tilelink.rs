use clap::{App, Arg};
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tilelink::agent::{DeviceAgent, DeviceParts};
use tilelink::modem;
use tilelink::safety::{ProcessWatchdog, ResetReason, WATCHDOG_TIMEOUT};
use tilelink::scheduler::SystemClock;
use tilelink::settings::Settings;
use tilelink::storage::{FileNvm, FileStore};
use tilelink::subsystems::{
    AbsentPowerSensor, Board, HostWireless, PanelDisplay, PanelIndicator, VirtualButton,
};

const DEFAULT_CONFIG: &str = "tilelink.toml";
const RESTART_DELAY: Duration = Duration::from_secs(1);

fn main() {
    let matches = App::new("tilelink")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Satellite messaging device control plane")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Settings file")
                .takes_value(true)
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::with_name("modem")
                .short("m")
                .long("modem")
                .value_name("PORT")
                .help("Serial device, or tcp://host:port for a networked modem")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Console listen port")
                .takes_value(true)
                .validator(|v| match v.parse::<u16>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Port must be a number between 0 and 65535".into()),
                }),
        )
        .arg(
            Arg::with_name("data-dir")
                .short("d")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory for the message table, latency log and NVM image")
                .takes_value(true),
        )
        .get_matches();

    let config_path = Path::new(matches.value_of("config").unwrap_or(DEFAULT_CONFIG));
    let mut settings = match Settings::load_or_default(config_path) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("tilelink: {}", e);
            process::exit(2);
        }
    };
    if let Some(port) = matches.value_of("modem") {
        settings.modem.port = port.to_string();
    }
    if let Some(port) = matches.value_of("port").and_then(|p| p.parse().ok()) {
        settings.console.port = port;
    }
    if let Some(dir) = matches.value_of("data-dir") {
        let dir = PathBuf::from(dir);
        settings.storage.nvm_path = dir.join("nvm.bin");
        settings.storage.data_dir = dir;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!(
        modem = %settings.modem.port,
        console = %settings.console_addr(),
        data = %settings.storage.data_dir.display(),
        "starting"
    );

    // Every restart rebuilds the device from persistent storage alone.
    loop {
        let reason = match build_parts(&settings) {
            Ok(parts) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    let mut device = DeviceAgent::new(parts);
                    device.run()
                }));
                outcome.unwrap_or_else(|_| ResetReason::Fatal("panic in poll loop".to_string()))
            }
            Err(e) => {
                error!("device setup failed: {}", e);
                ResetReason::Fatal(e.to_string())
            }
        };
        warn!(%reason, "restarting device");
        thread::sleep(RESTART_DELAY);
    }
}

fn build_parts(settings: &Settings) -> Result<DeviceParts, Box<dyn std::error::Error>> {
    fs::create_dir_all(&settings.storage.data_dir)?;
    let modem = modem::open(&settings.modem.port, settings.modem.baud_rate)?;
    let nvm = FileNvm::open(&settings.storage.nvm_path, settings.storage.nvm_size)?;
    let store = FileStore::new(settings.storage.data_dir.clone());

    let board = Board {
        indicator: Box::new(PanelIndicator::new()),
        display: Box::new(PanelDisplay::new()),
        button: Box::new(VirtualButton::new()),
        power: Box::new(AbsentPowerSensor),
        wireless: Box::new(HostWireless::new(
            settings.device.mac,
            settings.console.listen,
        )),
        watchdog: Box::new(ProcessWatchdog::start(WATCHDOG_TIMEOUT)),
    };

    Ok(DeviceParts {
        settings: settings.clone(),
        modem,
        nvm: Box::new(nvm),
        store: Box::new(store),
        board,
        clock: Box::new(SystemClock::new()),
    })
}
