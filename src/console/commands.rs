//! Administrative commands typed on the console.
//!
//! Replies are plain text lines. Commands that change the configuration persist it
//! before replying; commands that need a fresh start return a [`ResetReason`].

use tracing::{info, warn};

use crate::config::{ConfigError, DeviceConfig, IntervalChange, NetworkMode, WifiState};
use crate::fault::{triage, Fault};
use crate::safety::ResetReason;
use crate::storage::Nvm;
use crate::subsystems::{Indicator, PowerChannel, PowerMonitor, Rgbw, PIXEL_COUNT, USER_PIXEL};

pub const INVALID_REPLY: &str = "Invalid command. Type @help for help.";
pub const INTERVAL_REPLY: &str = "Interval can only be 0 or 15-720 minutes.";
pub const COLOR_USAGE: &str = "Usage: @color <r> <g> <b> <w>";
pub const RESET_REPLY: &str = "Resetting...";
pub const FACTORY_REPLY: &str = "Cleared NVM and Resetting...";

const HELP: [&str; 13] = [
    "@reset                      restart the device",
    "@factory                    erase settings and restart",
    "@color <r> <g> <b> <w>      set the user indicator",
    "@set mode <ap|station>",
    "@set wifi <enabled|disabled>",
    "@set ssid <name>",
    "@set pw <password>",
    "@set interval <0|15-720>    minutes, 0 turns reporting off",
    "@set broker <host>",
    "@show                       list settings",
    "@show <battery|solar|3v3>   last power reading",
    "@help",
    "Other lines are passed to the modem.",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetCommand {
    Mode(NetworkMode),
    Wifi(WifiState),
    Ssid(String),
    Password(String),
    /// `None` when the argument is not a number.
    Interval(Option<i32>),
    Broker(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    Reset,
    /// `None` when the arguments are missing or not bytes.
    Color(Option<Rgbw>),
    Set(SetCommand),
    ShowConfig,
    ShowPower(PowerChannel),
    Factory,
    Help,
    Invalid,
}

/// Text following `@set <key>`, trimmed.
fn rest_of_line<'a>(line: &'a str, key: &str) -> &'a str {
    line.strip_prefix("@set")
        .map(str::trim_start)
        .and_then(|l| l.strip_prefix(key))
        .map_or("", str::trim)
}

fn parse_color(args: &[&str]) -> Option<Rgbw> {
    let [r, g, b, w] = args else {
        return None;
    };
    Some(Rgbw::new(
        r.parse().ok()?,
        g.parse().ok()?,
        b.parse().ok()?,
        w.parse().ok()?,
    ))
}

fn parse_set(line: &str, params: &[&str]) -> AdminCommand {
    let key = params.get(1).copied().unwrap_or_default();
    let value = params.get(2).copied().unwrap_or_default();
    let text = |key| {
        let rest = rest_of_line(line, key);
        (!rest.is_empty()).then(|| rest.to_string())
    };

    let set = match key {
        "mode" => NetworkMode::parse(value).map(SetCommand::Mode),
        "wifi" => WifiState::parse(value).map(SetCommand::Wifi),
        "ssid" => text("ssid").map(SetCommand::Ssid),
        "pw" => text("pw").map(SetCommand::Password),
        "broker" => text("broker").map(SetCommand::Broker),
        "interval" => Some(SetCommand::Interval(value.parse().ok())),
        _ => None,
    };
    set.map_or(AdminCommand::Invalid, AdminCommand::Set)
}

impl AdminCommand {
    /// Parse a console line that starts with `@`.
    pub fn parse(line: &str) -> Self {
        let params: Vec<&str> = line.split(' ').collect();
        match params[0] {
            "@reset" => AdminCommand::Reset,
            "@color" => AdminCommand::Color(parse_color(&params[1..])),
            "@set" => parse_set(line, &params),
            "@show" => match params.get(1) {
                None => AdminCommand::ShowConfig,
                Some(name) => PowerChannel::parse(name)
                    .filter(|_| params.len() == 2)
                    .map_or(AdminCommand::Invalid, AdminCommand::ShowPower),
            },
            "@factory" => AdminCommand::Factory,
            "@help" => AdminCommand::Help,
            _ => AdminCommand::Invalid,
        }
    }
}

/// Device state a command may read or change.
pub struct CommandContext<'a> {
    pub config: &'a mut DeviceConfig,
    pub nvm: &'a mut dyn Nvm,
    pub indicator: &'a mut dyn Indicator,
    pub power: &'a PowerMonitor,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub reply: Vec<String>,
    pub reset: Option<ResetReason>,
}

impl CommandOutcome {
    fn reply(line: impl Into<String>) -> Self {
        Self {
            reply: vec![line.into()],
            reset: None,
        }
    }

    fn silent() -> Self {
        Self::default()
    }
}

fn persist(ctx: &mut CommandContext<'_>) {
    let result = ctx.config.save(ctx.nvm).map_err(Fault::from);
    if let Err(fault) = triage(result) {
        warn!(%fault, "configuration not saved");
    }
}

pub fn execute(command: AdminCommand, ctx: &mut CommandContext<'_>) -> CommandOutcome {
    match command {
        AdminCommand::Reset => CommandOutcome {
            reply: vec![RESET_REPLY.to_string()],
            reset: Some(ResetReason::AdminCommand),
        },
        AdminCommand::Color(Some(color)) => {
            if ctx.config.wifi_enabled() {
                ctx.indicator.set(USER_PIXEL, color);
            }
            CommandOutcome::silent()
        }
        AdminCommand::Color(None) => CommandOutcome::reply(COLOR_USAGE),
        AdminCommand::Set(set) => execute_set(set, ctx),
        AdminCommand::ShowConfig => CommandOutcome {
            reply: ctx.config.summary_lines(),
            reset: None,
        },
        AdminCommand::ShowPower(channel) => CommandOutcome::reply(ctx.power.report(channel)),
        AdminCommand::Factory => {
            if let Err(e) = DeviceConfig::erase(ctx.nvm) {
                warn!(error = %e, "configuration not erased");
            }
            info!("factory reset");
            CommandOutcome {
                reply: vec![FACTORY_REPLY.to_string()],
                reset: Some(ResetReason::FactoryReset),
            }
        }
        AdminCommand::Help => CommandOutcome {
            reply: HELP.iter().map(|l| (*l).to_string()).collect(),
            reset: None,
        },
        AdminCommand::Invalid => CommandOutcome::reply(INVALID_REPLY),
    }
}

fn execute_set(set: SetCommand, ctx: &mut CommandContext<'_>) -> CommandOutcome {
    let reply = match set {
        SetCommand::Mode(mode) => {
            ctx.config.mode = mode;
            format!("Successfully set mode to {}.", mode.as_str())
        }
        SetCommand::Wifi(wifi) => {
            ctx.config.wifi = wifi;
            if wifi == WifiState::Disabled {
                for index in 0..PIXEL_COUNT {
                    ctx.indicator.set(index, Rgbw::OFF);
                }
            }
            persist(ctx);
            return CommandOutcome {
                reply: vec![
                    format!("Successfully {} wifi.", wifi.as_str()),
                    RESET_REPLY.to_string(),
                ],
                reset: Some(ResetReason::WifiToggle),
            };
        }
        SetCommand::Ssid(ssid) => {
            let reply = format!("Successfully set ssid to {}.", ssid);
            ctx.config.ssid = ssid;
            reply
        }
        SetCommand::Password(password) => {
            let reply = format!("Successfully set password to {}.", password);
            ctx.config.password = password;
            reply
        }
        SetCommand::Interval(minutes) => {
            let change = minutes
                .ok_or(ConfigError::IntervalOutOfRange(0))
                .and_then(|m| ctx.config.set_interval(m));
            match change {
                Ok(IntervalChange::Off) => "Successfully set interval to off.".to_string(),
                Ok(IntervalChange::Minutes(m)) => format!("Successfully set interval to {}.", m),
                Err(_) => return CommandOutcome::reply(INTERVAL_REPLY),
            }
        }
        SetCommand::Broker(broker) => {
            let reply = format!("Successfully set broker to {}.", broker);
            ctx.config.broker = broker;
            reply
        }
    };
    persist(ctx);
    CommandOutcome::reply(reply)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vocabulary() {
        assert_eq!(AdminCommand::parse("@reset"), AdminCommand::Reset);
        assert_eq!(
            AdminCommand::parse("@color 1 2 3 4"),
            AdminCommand::Color(Some(Rgbw::new(1, 2, 3, 4)))
        );
        assert_eq!(AdminCommand::parse("@color 1 2"), AdminCommand::Color(None));
        assert_eq!(AdminCommand::parse("@color 1 2 3 999"), AdminCommand::Color(None));
        assert_eq!(
            AdminCommand::parse("@set mode sta"),
            AdminCommand::Set(SetCommand::Mode(NetworkMode::Station))
        );
        assert_eq!(
            AdminCommand::parse("@set ssid  My Field Net "),
            AdminCommand::Set(SetCommand::Ssid("My Field Net".into()))
        );
        assert_eq!(
            AdminCommand::parse("@set interval soon"),
            AdminCommand::Set(SetCommand::Interval(None))
        );
        assert_eq!(AdminCommand::parse("@show"), AdminCommand::ShowConfig);
        assert_eq!(
            AdminCommand::parse("@show 3v3"),
            AdminCommand::ShowPower(PowerChannel::Rail3v3)
        );
        assert_eq!(AdminCommand::parse("@show voltage"), AdminCommand::Invalid);
        assert_eq!(AdminCommand::parse("@set"), AdminCommand::Invalid);
        assert_eq!(AdminCommand::parse("@set ssid"), AdminCommand::Invalid);
        assert_eq!(AdminCommand::parse("@set colour red"), AdminCommand::Invalid);
        assert_eq!(AdminCommand::parse("@bogus"), AdminCommand::Invalid);
    }

    #[test]
    fn test_rest_of_line_keeps_inner_spaces() {
        assert_eq!(rest_of_line("@set pw  hunter 2", "pw"), "hunter 2");
        assert_eq!(rest_of_line("@set broker", "broker"), "");
    }
}
