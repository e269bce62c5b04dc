//! Stand-in for the satellite modem, reachable over TCP.
//!
//! Point the device at it with `--modem tcp://127.0.0.1:5000`. It answers the
//! bring-up handshake, streams date/time, position and noise reports at the rates
//! the device asks for, accepts `$TD` submissions and acknowledges each one after a
//! delay, and answers unsent-count queries.

use chrono::Utc;
use clap::{App, Arg};
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{debug, info, warn};

use tilelink::protocol::{encode_command, validate};

const DEFAULT_PORT: &str = "5000";
const DEFAULT_ACK_DELAY: &str = "20";
const BOOT_DELAY_SECS: u64 = 2;
const FIRMWARE_VERSION: &str = "$FV 2021-07-16-00:00:00,v1.1.0";

#[derive(Debug)]
struct ModemSim {
    seconds: u64,
    boot_at: Option<u64>,
    date_time_rate: u64,
    position_rate: u64,
    receive_rate: u64,
    next_msg_id: u32,
    ack_delay: u64,
    pending: Vec<(u64, u32)>,
}

impl ModemSim {
    fn new(ack_delay: u64) -> Self {
        Self {
            seconds: 0,
            boot_at: None,
            date_time_rate: 0,
            position_rate: 0,
            receive_rate: 0,
            next_msg_id: rand::thread_rng().gen_range(1..1_000_000),
            ack_delay,
            pending: Vec::new(),
        }
    }

    fn rate(body: &str) -> u64 {
        body.split(' ').nth(1).and_then(|r| r.parse().ok()).unwrap_or(0)
    }

    fn handle(&mut self, line: &str) -> Vec<String> {
        let Some(body) = validate(line) else {
            if !line.is_empty() {
                debug!(line, "ignoring unframed input");
            }
            return Vec::new();
        };
        info!(command = body, "received");

        let tag = body.split(' ').next().unwrap_or_default();
        let reply = match tag {
            "$FV" => FIRMWARE_VERSION.to_string(),
            "$RS" => {
                self.boot_at = Some(self.seconds + BOOT_DELAY_SECS);
                "$RS OK".to_string()
            }
            "$DT" => {
                self.date_time_rate = Self::rate(body);
                "$DT OK".to_string()
            }
            "$GN" => {
                self.position_rate = Self::rate(body);
                "$GN OK".to_string()
            }
            "$GS" => "$GS OK".to_string(),
            "$RT" => {
                self.receive_rate = Self::rate(body);
                "$RT OK".to_string()
            }
            "$TD" => {
                let id = self.next_msg_id;
                self.next_msg_id = self.next_msg_id.wrapping_add(1);
                self.pending.push((self.seconds + self.ack_delay, id));
                format!("$TD OK,{}", id)
            }
            "$MT" => format!("$MT {}", self.pending.len()),
            _ => format!("{} ERR,BADPARAM", tag),
        };
        vec![reply]
    }

    fn tick(&mut self) -> Vec<String> {
        self.seconds += 1;
        let mut out = Vec::new();
        let mut rng = rand::thread_rng();

        if self.boot_at.map_or(false, |at| self.seconds >= at) {
            self.boot_at = None;
            out.push("$TILE BOOT,RUNNING".to_string());
        }
        if self.date_time_rate > 0 && self.seconds % self.date_time_rate == 0 {
            out.push(format!("$DT {},V", Utc::now().format("%Y%m%d%H%M%S")));
        }
        if self.position_rate > 0 && self.seconds % self.position_rate == 0 {
            out.push("$GN 37.8921,-122.0155,77,89,2".to_string());
        }
        if self.receive_rate > 0 && self.seconds % self.receive_rate == 0 {
            out.push(format!("$RT RSSI={}", rng.gen_range(-110..-88)));
            if rng.gen_bool(0.1) {
                out.push(format!(
                    "$RT RSSI={},SNR={},FDEV={},TS={},DI=0x{:06x}",
                    rng.gen_range(-110..-88),
                    rng.gen_range(-5..12),
                    rng.gen_range(-2000..2000),
                    Utc::now().format("%Y-%m-%d %H:%M:%S"),
                    rng.gen_range(0..0xff_ffff),
                ));
            }
        }

        let now = self.seconds;
        let (due, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.pending = waiting;
        for (_, id) in due {
            out.push(format!(
                "$TD SENT RSSI={},SNR={},FDEV={},{}",
                rng.gen_range(-110..-90),
                rng.gen_range(0..10),
                rng.gen_range(-500..500),
                id
            ));
        }
        out
    }
}

async fn send(writer: &mut OwnedWriteHalf, body: &str) -> std::io::Result<()> {
    match encode_command(body) {
        Ok(framed) => {
            debug!(line = body, "sending");
            writer.write_all(framed.as_bytes()).await
        }
        Err(e) => {
            warn!(error = %e, "reply not framed");
            Ok(())
        }
    }
}

async fn serve(stream: TcpStream, ack_delay: u64) -> std::io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    let mut ticker = time::interval(Duration::from_secs(1));
    let mut sim = ModemSim::new(ack_delay);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                for reply in sim.handle(line.trim_end_matches('\r')) {
                    send(&mut writer, &reply).await?;
                }
            }
            _ = ticker.tick() => {
                for report in sim.tick() {
                    send(&mut writer, &report).await?;
                }
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("tilelink-modem-sim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("Simulated satellite modem over TCP")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Listen port")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("ack-delay")
                .long("ack-delay")
                .value_name("SECONDS")
                .help("Delay between accepting a message and its satellite acknowledgment")
                .takes_value(true)
                .default_value(DEFAULT_ACK_DELAY),
        )
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;
    let ack_delay: u64 = matches
        .value_of("ack-delay")
        .unwrap_or(DEFAULT_ACK_DELAY)
        .parse()?;

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "modem simulator listening");

    loop {
        let (stream, peer) = listener.accept().await?;
        info!(%peer, "device connected");
        tokio::spawn(async move {
            if let Err(e) = serve(stream, ack_delay).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
            info!(%peer, "device disconnected");
        });
    }
}
