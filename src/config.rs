//! # config.rs – Centralized Parameter Store
//!
//! This module holds all static program parameters used throughout the system.
//! Keeping configuration in one place makes tuning, experimentation, and testing easier.
//!
//! The per-run values are gathered in [DispatcherSettings] and [ElevatorSettings].
//! Their `Default` implementations are built from the constants below, so tests can
//! shorten the timings without touching the globals.

use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use once_cell::sync::Lazy;

//
// ──────────────────────────────────────────────────────────────
//   1. NETWORK SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// Well-known port the dispatcher accepts elevator connections on
pub const ELEVATOR_PORT: u16 = 55555;

/// Default dispatcher address used by the elevator when no arguments are given
pub static DEFAULT_DISPATCHER_IP: &str = "127.0.0.1";

/// Host the process-pair heartbeat runs on (always same-host)
pub static HEARTBEAT_HOST: &str = "127.0.0.1";

/// Address of the elevator server (simulator or hardware driver)
pub static LOCAL_ELEV_IP: &str = "localhost:15657";

/// Largest payload a single frame can carry (length prefix is a `u16`)
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Number of consecutive encode/decode failures tolerated before the connection is dropped
pub const CODEC_RETRY_BUDGET: u32 = 5;

//
// ──────────────────────────────────────────────────────────────
//   2. SYSTEM & ELEVATOR PARAMETERS
// ──────────────────────────────────────────────────────────────
//

/// Default number of floors
pub const DEFAULT_NUM_FLOORS: u8 = 4;

/// Number of button kinds per floor (up, down, cab)
pub const NUM_BUTTONS: u8 = 3;

/// Dispatcher-side log of all outstanding hall calls
pub static DISPATCHER_LOG_FILE: &str = "elevator_log.bin";

/// Elevator-side log of car calls
pub static ELEVATOR_LOG_FILE: &str = "elev_log.bin";

//
// ──────────────────────────────────────────────────────────────
//   3. TIMING & TIMEOUTS & INTERVALS
// ──────────────────────────────────────────────────────────────
//

/// Period between liveness probes on every elevator connection
pub const PROBE_PERIOD: Duration = Duration::from_millis(1000);

/// A connection with no frames for this long is considered dead
pub const LIVENESS_TIMEOUT: Duration = Duration::from_millis(3000);

/// Backoff before a log write is retried
pub const LOG_RETRY_DELAY: Duration = Duration::from_millis(30);

/// Backoff before an order with no eligible car is dispatched again
pub const DISPATCH_RETRY: Duration = Duration::from_secs(3);

/// Period of the process-pair liveness token
pub const HEARTBEAT_PERIOD: Duration = Duration::from_millis(30);

/// Heartbeat partner is declared dead if it stays silent for this long
pub const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(1000);

/// How long a freshly launched backup gets to connect back
pub const BACKUP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How often the dispatcher checks if the local elevator must be started
pub const LOCAL_ELEVATOR_CHECK: Duration = Duration::from_secs(5);

/// Duration between elevator hardware polls
pub const ELEV_POLL: Duration = Duration::from_millis(25);

/// Period of the elevator control loop
pub const POLL_PERIOD: Duration = Duration::from_millis(10);

/// How long the door stays open at a floor
pub const DOOR_OPEN_TIME: Duration = Duration::from_secs(2);

/// How long the stop lamp stays lit after an emergency stop
pub const STOP_LAMP_TIME: Duration = Duration::from_secs(1);

/// Delay between attempts to reach the dispatcher
pub const RECONNECT_DELAY: Duration = Duration::from_millis(1000);

//
// ──────────────────────────────────────────────────────────────
//   4. LOGGING CONFIGURATION
// ──────────────────────────────────────────────────────────────
//

/// Enable/disable printing of the fleet table
pub static PRINT_FLEET_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of errors
pub static PRINT_ERR_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of warnings
pub static PRINT_WARN_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of success messages
pub static PRINT_OK_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable printing of general info
pub static PRINT_INFO_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

/// Enable/disable role-tagged prints (dispatcher / elevator)
pub static PRINT_ELSE_ON: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(true));

//
// ──────────────────────────────────────────────────────────────
//   5. RUNTIME SETTINGS
// ──────────────────────────────────────────────────────────────
//

/// Everything one dispatcher process needs to know.
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Address the elevator listener binds to
    pub bind_ip: String,
    /// Port the elevator listener binds to. `0` picks an ephemeral port.
    pub elevator_port: u16,
    /// Location of the fleet-wide order log
    pub log_path: PathBuf,
    pub probe_period: Duration,
    pub liveness_timeout: Duration,
    pub dispatch_retry: Duration,
    pub codec_retry_budget: u32,
    pub log_retry_delay: Duration,
    pub heartbeat_period: Duration,
    pub heartbeat_timeout: Duration,
    pub backup_connect_timeout: Duration,
    /// Open the backup in its own terminal window
    pub backup_in_terminal: bool,
    /// Elevator executable started when the fleet is empty
    pub local_elevator: Option<PathBuf>,
    pub local_elevator_check: Duration,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        DispatcherSettings {
            bind_ip: "0.0.0.0".to_string(),
            elevator_port: ELEVATOR_PORT,
            log_path: PathBuf::from(DISPATCHER_LOG_FILE),
            probe_period: PROBE_PERIOD,
            liveness_timeout: LIVENESS_TIMEOUT,
            dispatch_retry: DISPATCH_RETRY,
            codec_retry_budget: CODEC_RETRY_BUDGET,
            log_retry_delay: LOG_RETRY_DELAY,
            heartbeat_period: HEARTBEAT_PERIOD,
            heartbeat_timeout: HEARTBEAT_TIMEOUT,
            backup_connect_timeout: BACKUP_CONNECT_TIMEOUT,
            backup_in_terminal: false,
            local_elevator: None,
            local_elevator_check: LOCAL_ELEVATOR_CHECK,
        }
    }
}

/// Everything one elevator process needs to know.
#[derive(Debug, Clone)]
pub struct ElevatorSettings {
    /// `ip:port` of the dispatcher
    pub dispatcher_addr: String,
    /// `host:port` of the elevator server
    pub driver_addr: String,
    pub num_floors: u8,
    /// Location of the car-call log
    pub log_path: PathBuf,
    pub probe_period: Duration,
    pub liveness_timeout: Duration,
    pub reconnect_delay: Duration,
    pub codec_retry_budget: u32,
    pub log_retry_delay: Duration,
    pub poll_period: Duration,
    pub door_open_time: Duration,
    pub stop_lamp_time: Duration,
}

impl Default for ElevatorSettings {
    fn default() -> Self {
        ElevatorSettings {
            dispatcher_addr: format!("{}:{}", DEFAULT_DISPATCHER_IP, ELEVATOR_PORT),
            driver_addr: LOCAL_ELEV_IP.to_string(),
            num_floors: DEFAULT_NUM_FLOORS,
            log_path: PathBuf::from(ELEVATOR_LOG_FILE),
            probe_period: PROBE_PERIOD,
            liveness_timeout: LIVENESS_TIMEOUT,
            reconnect_delay: RECONNECT_DELAY,
            codec_retry_budget: CODEC_RETRY_BUDGET,
            log_retry_delay: LOG_RETRY_DELAY,
            poll_period: POLL_PERIOD,
            door_open_time: DOOR_OPEN_TIME,
            stop_lamp_time: STOP_LAMP_TIME,
        }
    }
}
