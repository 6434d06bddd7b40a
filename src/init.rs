//! ## Start-up argument handling
//!
//! Both programs take positional arguments plus `key::value` options:
//!
//! - dispatcher: `[heartbeat-port]`. Without a port the process is the primary,
//!   with one it is the backup of the primary listening on that port.
//! - elevator: `[<dispatcher-ip> <dispatcher-port> [driver-address]]`
//!
//! Options shared by both: `print_fleet`, `print_err`, `print_warn`, `print_ok`,
//! `print_info`, `print_else` (each `::true/false`) and `debug` (errors only).
//!
//! A backup dispatcher is started with nothing but the heartbeat port. The primary's
//! options reach it through [OPTIONS_ENV], one option per line.

use std::path::PathBuf;
use std::sync::PoisonError;

use anyhow::{bail, Context};

use crate::config::{self, DispatcherSettings, ElevatorSettings};

/// Environment variable carrying the primary's options to its backups.
pub const OPTIONS_ENV: &str = "ELEVDISPATCH_OPTIONS";

/// What the dispatcher binary was asked to do.
#[derive(Debug, Clone)]
pub struct DispatcherArgs {
    /// Heartbeat port of the primary, if started as backup
    pub backup_of: Option<u16>,
    pub settings: DispatcherSettings,
    /// The options in effect, handed on to every backup through [OPTIONS_ENV]
    pub forwarded: Vec<String>,
}

pub fn wants_help(args: &[String]) -> bool {
    args.iter().any(|a| a.eq_ignore_ascii_case("help") || a == "--help" || a == "-h")
}

pub fn dispatcher_usage() -> String {
    [
        "Usage: dispatcher [heartbeat-port] [options]",
        "  (no port)               start as primary",
        "  <port>                  start as backup of the primary on <port>",
        "  terminal::true/false    open backups in their own terminal",
        "  local_elevator::<path>  start this elevator when the fleet is empty",
        "  log::<path>             order log file",
        "  elevator_port::<port>   port elevators connect to",
        PRINT_USAGE,
    ]
    .join("\n")
}

pub fn elevator_usage() -> String {
    [
        "Usage: elevator [<dispatcher-ip> <dispatcher-port> [driver-address]] [options]",
        "  driver::<host:port>     elevator server address",
        "  floors::<n>             number of floors",
        "  log::<path>             car call log file",
        PRINT_USAGE,
    ]
    .join("\n")
}

const PRINT_USAGE: &str = "  print_fleet::true/false\n  print_err::true/false\n  print_warn::true/false\n  print_ok::true/false\n  print_info::true/false\n  print_else::true/false\n  debug                   only errors are printed";

fn set(flag: &std::sync::Mutex<bool>, on: bool) {
    *flag.lock().unwrap_or_else(PoisonError::into_inner) = on;
}

/// Applies one print option. Returns `false` if `key` is not a print option.
pub fn apply_print_option(key: &str, value: &str) -> bool {
    let is_true = value.eq_ignore_ascii_case("true");
    match key {
        "print_fleet" => set(&config::PRINT_FLEET_ON, is_true),
        "print_err" => set(&config::PRINT_ERR_ON, is_true),
        "print_warn" => set(&config::PRINT_WARN_ON, is_true),
        "print_ok" => set(&config::PRINT_OK_ON, is_true),
        "print_info" => set(&config::PRINT_INFO_ON, is_true),
        "print_else" => set(&config::PRINT_ELSE_ON, is_true),
        _ => return false,
    }
    true
}

/// Debug mode: only error messages
fn apply_debug() {
    set(&config::PRINT_FLEET_ON, false);
    set(&config::PRINT_WARN_ON, false);
    set(&config::PRINT_OK_ON, false);
    set(&config::PRINT_INFO_ON, false);
    set(&config::PRINT_ELSE_ON, false);
}

/// Splits `args` (without the program name) into positionals and `key::value` options.
///
/// Print options and `debug` are applied on the way.
fn split_args(args: &[String]) -> (Vec<String>, Vec<(String, String)>, Vec<String>) {
    let mut positional = Vec::new();
    let mut options = Vec::new();
    let mut forwarded = Vec::new();
    for arg in args {
        if arg.eq_ignore_ascii_case("debug") {
            apply_debug();
            forwarded.push(arg.clone());
        } else if let Some((key, value)) = arg.split_once("::") {
            let key = key.to_lowercase();
            forwarded.push(arg.clone());
            if !apply_print_option(&key, value) {
                options.push((key, value.to_string()));
            }
        } else {
            positional.push(arg.clone());
        }
    }
    (positional, options, forwarded)
}

/// Puts the options inherited through [OPTIONS_ENV] in front of `args`.
///
/// Later options win, so anything given on the command line overrides what was inherited.
pub fn with_inherited_options(inherited: Option<&str>, args: &[String]) -> Vec<String> {
    inherited
        .into_iter()
        .flat_map(str::lines)
        .filter(|line| !line.trim().is_empty())
        .map(str::to_string)
        .chain(args.iter().cloned())
        .collect()
}

/// Value of [OPTIONS_ENV] for the backups of a process parsed into `parsed`.
pub fn options_for_backup(parsed: &DispatcherArgs) -> String {
    parsed.forwarded.join("\n")
}

fn parse_port(s: &str) -> anyhow::Result<u16> {
    s.parse::<u16>().with_context(|| format!("'{}' is not a port number", s))
}

pub fn parse_dispatcher_args(args: &[String]) -> anyhow::Result<DispatcherArgs> {
    let (positional, options, forwarded) = split_args(args);
    let mut settings = DispatcherSettings::default();

    for (key, value) in options {
        match key.as_str() {
            "terminal" => settings.backup_in_terminal = value.eq_ignore_ascii_case("true"),
            "local_elevator" => settings.local_elevator = Some(PathBuf::from(value)),
            "log" => settings.log_path = PathBuf::from(value),
            "elevator_port" => settings.elevator_port = parse_port(&value)?,
            _ => bail!("unknown option '{}::{}'", key, value),
        }
    }

    let backup_of = match positional.as_slice() {
        [] => None,
        [port] => Some(parse_port(port)?),
        _ => bail!("expected at most one argument (the primary's heartbeat port)"),
    };

    Ok(DispatcherArgs { backup_of, settings, forwarded })
}

pub fn parse_elevator_args(args: &[String]) -> anyhow::Result<ElevatorSettings> {
    let (positional, options, _) = split_args(args);
    let mut settings = ElevatorSettings::default();

    for (key, value) in options {
        match key.as_str() {
            "driver" => settings.driver_addr = value,
            "floors" => {
                settings.num_floors = value
                    .parse::<u8>()
                    .with_context(|| format!("'{}' is not a floor count", value))?;
                if settings.num_floors < 2 {
                    bail!("an elevator needs at least two floors");
                }
            }
            "log" => settings.log_path = PathBuf::from(value),
            _ => bail!("unknown option '{}::{}'", key, value),
        }
    }

    match positional.as_slice() {
        [] => {}
        [ip, port] => {
            settings.dispatcher_addr = format!("{}:{}", ip, parse_port(port)?);
        }
        [ip, port, driver] => {
            settings.dispatcher_addr = format!("{}:{}", ip, parse_port(port)?);
            settings.driver_addr = driver.clone();
        }
        _ => bail!("expected no arguments or <dispatcher-ip> <dispatcher-port> [driver-address]"),
    }

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn dispatcher_without_port_is_primary() {
        let parsed = parse_dispatcher_args(&args(&["log::/tmp/x.bin", "terminal::true"])).unwrap();
        assert_eq!(parsed.backup_of, None);
        assert_eq!(parsed.settings.log_path, PathBuf::from("/tmp/x.bin"));
        assert!(parsed.settings.backup_in_terminal);
        assert_eq!(parsed.forwarded, args(&["log::/tmp/x.bin", "terminal::true"]));
    }

    #[test]
    fn backup_inherits_options_through_the_environment() {
        let primary = parse_dispatcher_args(&args(&["log::/tmp/x.bin", "elevator_port::4000"])).unwrap();
        let env = options_for_backup(&primary);

        let merged = with_inherited_options(Some(env.as_str()), &args(&["40123"]));
        let backup = parse_dispatcher_args(&merged).unwrap();
        assert_eq!(backup.backup_of, Some(40123));
        assert_eq!(backup.settings.log_path, PathBuf::from("/tmp/x.bin"));
        assert_eq!(backup.settings.elevator_port, 4000);
        // and on to the next backup
        assert_eq!(options_for_backup(&backup), env);

        let own = with_inherited_options(Some(env.as_str()), &args(&["log::/tmp/y.bin"]));
        assert_eq!(parse_dispatcher_args(&own).unwrap().settings.log_path, PathBuf::from("/tmp/y.bin"));

        assert_eq!(with_inherited_options(None, &args(&["1"])), args(&["1"]));
        assert_eq!(with_inherited_options(Some(""), &args(&["1"])), args(&["1"]));
    }

    #[test]
    fn dispatcher_with_port_is_backup() {
        let parsed = parse_dispatcher_args(&args(&["40123"])).unwrap();
        assert_eq!(parsed.backup_of, Some(40123));
        assert!(parse_dispatcher_args(&args(&["notaport"])).is_err());
        assert!(parse_dispatcher_args(&args(&["1", "2"])).is_err());
        assert!(parse_dispatcher_args(&args(&["bogus::1"])).is_err());
    }

    #[test]
    fn elevator_takes_dispatcher_address() {
        let s = parse_elevator_args(&args(&[])).unwrap();
        assert_eq!(s.dispatcher_addr, format!("127.0.0.1:{}", config::ELEVATOR_PORT));

        let s = parse_elevator_args(&args(&["10.0.0.7", "4000", "floors::6"])).unwrap();
        assert_eq!(s.dispatcher_addr, "10.0.0.7:4000");
        assert_eq!(s.num_floors, 6);

        let s = parse_elevator_args(&args(&["10.0.0.7", "4000", "localhost:15658"])).unwrap();
        assert_eq!(s.driver_addr, "localhost:15658");

        assert!(parse_elevator_args(&args(&["10.0.0.7"])).is_err());
        assert!(parse_elevator_args(&args(&["floors::1"])).is_err());
    }

    #[test]
    fn help_is_recognized() {
        assert!(wants_help(&args(&["help"])));
        assert!(!wants_help(&args(&["4000"])));
    }
}
