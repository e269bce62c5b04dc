use std::io::{BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::thread;
use std::time::Duration;

use tilelink::agent::{DeviceAgent, DeviceParts};
use tilelink::config::{DeviceConfig, WifiState};
use tilelink::console::ConnectionState;
use tilelink::fault::Fault;
use tilelink::modem::ScriptedModem;
use tilelink::protocol::encode_command;
use tilelink::safety::{CountingWatchdog, ResetReason};
use tilelink::scheduler::ManualClock;
use tilelink::settings::Settings;
use tilelink::storage::{MemoryNvm, MemoryStore};
use tilelink::subsystems::*;

const MAC: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Test doubles for every device part. Each field is a probe sharing state with the
/// handle given to the device.
struct Rig {
    modem: ScriptedModem,
    clock: ManualClock,
    nvm: MemoryNvm,
    store: MemoryStore,
    indicator: PanelIndicator,
    display: PanelDisplay,
    button: VirtualButton,
    watchdog: CountingWatchdog,
    wireless: HostWireless,
}

impl Rig {
    fn new() -> Self {
        let modem = ScriptedModem::new();
        modem.respond_to_bringup();
        Self {
            modem,
            clock: ManualClock::new(),
            nvm: MemoryNvm::new(2048),
            store: MemoryStore::new(),
            indicator: PanelIndicator::new(),
            display: PanelDisplay::new(),
            button: VirtualButton::new(),
            watchdog: CountingWatchdog::new(),
            wireless: HostWireless::new(MAC, LOCALHOST),
        }
    }

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.console.listen = LOCALHOST;
        settings.console.port = 0;
        settings.scheduler.idle_backoff_ms = 0;
        settings
    }

    fn device(&self) -> DeviceAgent {
        DeviceAgent::new(DeviceParts {
            settings: Self::settings(),
            modem: Box::new(self.modem.clone()),
            nvm: Box::new(self.nvm.handle()),
            store: Box::new(self.store.clone()),
            board: Board {
                indicator: Box::new(self.indicator.clone()),
                display: Box::new(self.display.clone()),
                button: Box::new(self.button.clone()),
                power: Box::new(AbsentPowerSensor),
                wireless: Box::new(self.wireless.clone()),
                watchdog: Box::new(self.watchdog.clone()),
            },
            clock: Box::new(self.clock.clone()),
        })
    }

    /// A device that has finished booting, with the bring-up traffic cleared.
    fn booted(&self) -> DeviceAgent {
        let mut device = self.device();
        assert_eq!(device.start().unwrap(), None);
        self.modem.take_written();
        device
    }

    fn store_config(&self, config: &DeviceConfig) {
        config.save(&mut self.nvm.handle()).unwrap();
    }
}

fn framed(body: &str) -> String {
    encode_command(body).unwrap().trim_end().to_string()
}

fn connect(device: &mut DeviceAgent) -> BufReader<TcpStream> {
    let addr = device.console_addr().expect("console listening");
    let client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    for _ in 0..500 {
        device.tick().unwrap();
        if device.console().state() == ConnectionState::Connected {
            return BufReader::new(client);
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("console never accepted");
}

fn tick_until<F: Fn(&DeviceAgent) -> bool>(device: &mut DeviceAgent, done: F) {
    for _ in 0..500 {
        assert_eq!(device.tick().unwrap(), None);
        if done(device) {
            return;
        }
        thread::sleep(Duration::from_millis(2));
    }
    panic!("condition not reached");
}

fn read_line(reader: &mut BufReader<TcpStream>) -> String {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    line.trim_end_matches('\n').to_string()
}

#[test]
fn test_boot_brings_up_modem_network_and_console() {
    let rig = Rig::new();
    let device = rig.booted();

    assert!(device.is_configured());
    assert_eq!(device.network(), NetworkStatus::AccessPoint(LOCALHOST));
    assert!(device.console_addr().is_some());
    assert_eq!(rig.display.line(STATUS_LINE), "AP: 127.0.0.1");
    assert_eq!(rig.wireless.last_ssid().as_deref(), Some("swarm-0001"));
    assert!(rig.watchdog.feeds() >= 7);
}

#[test]
fn test_held_button_at_boot_clears_configuration() {
    let mut rig = Rig::new();
    let mut config = DeviceConfig::default();
    config.ssid = "custom".to_string();
    rig.store_config(&config);
    rig.button = VirtualButton::held();

    let mut device = rig.device();
    assert_eq!(device.start().unwrap(), Some(ResetReason::FactoryReset));
    assert_eq!(DeviceConfig::load(&rig.nvm.handle()), DeviceConfig::default());
    assert!(rig.modem.written().is_empty());
}

#[test]
fn test_messages_wait_for_a_fix_then_follow_the_cadence() {
    let rig = Rig::new();
    let mut device = rig.booted();

    device.tick().unwrap();
    assert!(!rig.modem.written().contains("$TD"));

    rig.modem.feed_line("$DT 20210408195123,V");
    device.tick().unwrap();
    let written = rig.modem.take_written();
    assert!(written.contains("$TD AI=123,"));
    assert!(written.contains(&framed("$MT C=U")));
    assert_eq!(rig.display.line(LOG_LINE), "Sending message...");
    assert_eq!(device.state().messages_submitted, 1);
    let local_id = device.tracker().in_flight().unwrap().to_string();

    rig.modem.feed_line("$TD OK,7");
    device.tick().unwrap();
    assert_eq!(device.tracker().local_id_for("7"), Some(local_id.as_str()));
    let record = device.tracker().record(&local_id).unwrap();
    assert_eq!(record.time_submitted.as_deref(), Some("2021-04-08T19:51:23"));
    assert_eq!(rig.store.messages().len(), 1);

    rig.clock.advance(Duration::from_secs(899));
    device.tick().unwrap();
    assert!(!rig.modem.written().contains("$TD"));

    rig.clock.advance(Duration::from_secs(2));
    device.tick().unwrap();
    assert!(rig.modem.written().contains("$TD AI=123,"));
    assert_eq!(device.state().messages_submitted, 2);
}

#[test]
fn test_console_commands_replies_and_remote_log() {
    let rig = Rig::new();
    let mut device = rig.booted();
    let mut client = connect(&mut device);

    client.get_mut().write_all(b"@show\n").unwrap();
    tick_until(&mut device, |d| d.state().console_lines == 1);
    let reply: Vec<String> = (0..6).map(|_| read_line(&mut client)).collect();
    assert_eq!(reply[0], "wifi mode:ap");
    assert_eq!(reply[5], "broker: nootropicdesign.com");
    // Console lines are relayed to the modem as typed.
    assert_eq!(rig.modem.take_written(), "@show\n");

    // Suppressed tags stay off the remote log; others are echoed raw, stamped with
    // the fix once there is one.
    rig.modem.feed_line("$M138 DATETIME");
    tick_until(&mut device, |d| d.state().modem_lines == 1);
    assert_eq!(read_line(&mut client), framed("$M138 DATETIME"));

    rig.modem.feed_line("$DT 20220208163620,V");
    rig.modem.feed_line("$M138 BOOT,RUNNING");
    tick_until(&mut device, |d| d.state().modem_lines == 3);
    assert_eq!(
        read_line(&mut client),
        format!("2022-02-08T16:36:20 {}", framed("$M138 BOOT,RUNNING"))
    );
    // The fix also opened the send cadence.
    assert_eq!(read_line(&mut client), "2022-02-08T16:36:20 Sending message...");

    rig.modem.feed_line("$MT 2");
    tick_until(&mut device, |d| d.state().modem_lines == 4);
    assert_eq!(read_line(&mut client), "2022-02-08T16:36:20 unsent messages: 2");
}

#[test]
fn test_console_line_to_modem_is_forwarded_without_reply() {
    let rig = Rig::new();
    let mut device = rig.booted();
    let mut client = connect(&mut device);

    client.get_mut().write_all(b"$GS 5*01\n").unwrap();
    tick_until(&mut device, |d| d.state().console_lines == 1);
    assert_eq!(rig.modem.take_written(), "$GS 5*01\n");
}

#[test]
fn test_reset_command_ends_the_loop() {
    let rig = Rig::new();
    let mut device = rig.booted();
    let mut client = connect(&mut device);

    client.get_mut().write_all(b"@reset\n").unwrap();
    let mut reason = None;
    for _ in 0..500 {
        reason = device.tick().unwrap();
        if reason.is_some() {
            break;
        }
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(reason, Some(ResetReason::AdminCommand));
    assert_eq!(read_line(&mut client), "Resetting...");
    assert_eq!(rig.modem.take_written(), "@reset\n");
}

#[test]
fn test_button_toggles_wifi_and_restarts() {
    let rig = Rig::new();
    let mut device = rig.booted();
    rig.modem.feed_line("$RT RSSI=-80");
    device.tick().unwrap();
    assert_eq!(rig.indicator.pixel(SIGNAL_PIXEL), Rgbw::new(16, 0, 0, 0));

    rig.button.click();
    assert_eq!(device.tick().unwrap(), None);
    assert_eq!(device.tick().unwrap(), Some(ResetReason::WifiToggle));
    assert_eq!(
        DeviceConfig::load(&rig.nvm.handle()).wifi,
        WifiState::Disabled
    );
    assert_eq!(rig.indicator.pixel(SIGNAL_PIXEL), Rgbw::OFF);

    // The next boot comes up dark and without a console.
    let mut device = rig.booted();
    assert_eq!(device.network(), NetworkStatus::Disabled);
    assert!(device.console_addr().is_none());
    rig.modem.feed_line("$RT RSSI=-80");
    device.tick().unwrap();
    assert_eq!(rig.indicator.pixel(SIGNAL_PIXEL), Rgbw::OFF);
}

#[test]
fn test_lost_modem_link_is_fatal() {
    let rig = Rig::new();
    let mut device = rig.booted();
    rig.modem.close();
    assert!(matches!(device.tick(), Err(Fault::LinkLost(_))));

    let mut fresh = rig.device();
    assert!(matches!(fresh.run(), ResetReason::Fatal(_)));
}

#[test]
fn test_noise_and_bad_lines_do_not_stop_the_loop() {
    let rig = Rig::new();
    let mut device = rig.booted();
    rig.modem.feed_raw(b"\x00\xff garbage\n$DT OK*00\n");
    rig.modem.feed_line("$TD SENT RSSI=-104,SNR=-3,FDEV=-1,99");
    rig.modem.feed_line("$TD OK,5");
    rig.modem.feed_line("$DT not-a-time");

    let fed = rig.watchdog.feeds();
    assert_eq!(device.tick().unwrap(), None);
    assert_eq!(rig.watchdog.feeds(), fed + 1);
    assert_eq!(device.state().modem_lines, 5);
    assert_eq!(device.state().rejected_lines, 2);
    assert!(device.tracker().records().is_empty());
    assert!(device.telemetry().last_fix().is_none());
}

#[test]
fn test_message_table_survives_restart() {
    let rig = Rig::new();
    let mut device = rig.booted();
    rig.modem.feed_line("$DT 20210408195123,V");
    device.tick().unwrap();
    let local_id = device.tracker().in_flight().unwrap().to_string();
    rig.modem.feed_line("$TD OK,7");
    device.tick().unwrap();
    drop(device);

    let mut device = rig.booted();
    assert_eq!(device.tracker().local_id_for("7"), Some(local_id.as_str()));
    rig.modem.feed_line("$DT 20210408195223,V");
    rig.modem.feed_line("$TD SENT RSSI=-104,SNR=-3,FDEV=-1,7");
    device.tick().unwrap();
    assert_eq!(
        rig.store.latency_rows(),
        vec![format!("{},2021-04-08T19:51:23,60", local_id)]
    );
}
