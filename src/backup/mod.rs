//! ## Process-pair failover
//!
//! Two dispatcher processes on the same host keep a private TCP connection and
//! trade one-line liveness tokens on it every `heartbeat_period`:
//!
//! - The **primary** binds an ephemeral port, launches the backup with that port as
//!   its only argument, accepts it, then heartbeats. When the link breaks it reports
//!   [ProcessDied] with `primary: false`.
//! - The **backup** connects to the port and heartbeats. When the link breaks it
//!   reports [ProcessDied] with `primary: true`.
//!
//! A partner that closes the socket, errors, or stays silent for `heartbeat_timeout`
//! counts as dead. What to do about it is up to [crate::regulator].

use std::env;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicU8, Ordering};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{interval, sleep, timeout, Duration, Instant, MissedTickBehavior};

use crate::config::{self, DispatcherSettings};
use crate::network;
use crate::print;

/// Token the primary writes on the heartbeat link
pub const PRIMARY_TOKEN: &str = "Primary is alive";
/// Token the backup writes on the heartbeat link
pub const BACKUP_TOKEN: &str = "Backup is alive";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Primary,
    Backup,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Primary => write!(f, "primary"),
            Role::Backup => write!(f, "backup"),
        }
    }
}

/// Role of this process. It can only ever move from backup to primary.
#[derive(Debug)]
pub struct RoleCell(AtomicU8);

impl RoleCell {
    pub fn new(role: Role) -> Self {
        RoleCell(AtomicU8::new(Self::encode(role)))
    }

    pub fn get(&self) -> Role {
        match self.0.load(Ordering::SeqCst) {
            0 => Role::Primary,
            _ => Role::Backup,
        }
    }

    /// Backup → primary.
    ///
    /// ## Returns
    /// - `true` for the one call that actually changed the role, `false` otherwise.
    pub fn promote(&self) -> bool {
        self.0
            .compare_exchange(
                Self::encode(Role::Backup),
                Self::encode(Role::Primary),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn encode(role: Role) -> u8 {
        match role {
            Role::Primary => 0,
            Role::Backup => 1,
        }
    }
}

/// The heartbeat partner is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessDied {
    /// `true` if the primary died (raised by the backup), `false` if the backup died
    pub primary: bool,
}

/// Starts a backup process that will connect back to `port`.
pub trait BackupLauncher: Send + Sync {
    fn launch(&self, port: u16) -> anyhow::Result<()>;
}

/// Launches a copy of an executable with the heartbeat port as its only argument.
///
/// Anything else the backup needs travels in its environment.
#[derive(Debug, Clone)]
pub struct ExeLauncher {
    exe: PathBuf,
    new_terminal: bool,
    env: Vec<(String, String)>,
}

impl ExeLauncher {
    pub fn new(exe: PathBuf, new_terminal: bool) -> Self {
        ExeLauncher { exe, new_terminal, env: Vec::new() }
    }

    /// Sets `key` in the environment of every backup.
    pub fn with_env(mut self, key: &str, value: String) -> Self {
        self.env.push((key.to_string(), value));
        self
    }

    /// Launches this very executable.
    pub fn current(new_terminal: bool) -> anyhow::Result<Self> {
        let exe = env::current_exe().context("Couldnt extract the executable")?;
        Ok(ExeLauncher::new(exe, new_terminal))
    }

    /// The command [BackupLauncher::launch] spawns.
    pub fn command(&self, port: u16) -> Command {
        let mut cmd = if self.new_terminal {
            let mut cmd = Command::new("gnome-terminal");
            cmd.arg("--geometry=400x24").arg("--").arg(&self.exe);
            cmd
        } else {
            Command::new(&self.exe)
        };
        cmd.arg(port.to_string())
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        cmd
    }
}

impl BackupLauncher for ExeLauncher {
    fn launch(&self, port: u16) -> anyhow::Result<()> {
        self.command(port)
            .spawn()
            .with_context(|| format!("starting backup {}", self.exe.display()))?;
        Ok(())
    }
}

/// Primary side of the heartbeat link.
pub struct PrimaryNotifier {
    listener: TcpListener,
    port: u16,
    period: Duration,
    silence: Duration,
    connect_timeout: Duration,
}

impl PrimaryNotifier {
    /// Binds an ephemeral port on the loopback interface.
    pub fn bind(settings: &DispatcherSettings) -> io::Result<Self> {
        let listener = network::create_reusable_listener(config::HEARTBEAT_HOST, 0)?;
        let port = listener.local_addr()?.port();
        Ok(PrimaryNotifier {
            listener,
            port,
            period: settings.heartbeat_period,
            silence: settings.heartbeat_timeout,
            connect_timeout: settings.backup_connect_timeout,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Launches a backup and heartbeats with it until it dies.
    ///
    /// A backup that cannot be launched, or that never connects, counts as dead too,
    /// so the caller simply tries again.
    pub async fn run(self, launcher: &dyn BackupLauncher) -> ProcessDied {
        let died = ProcessDied { primary: false };

        if let Err(e) = launcher.launch(self.port) {
            print::err(format!("Could not launch backup: {:#}", e));
            return died;
        }

        let stream = match timeout(self.connect_timeout, self.listener.accept()).await {
            Ok(Ok((stream, _))) => stream,
            Ok(Err(e)) => {
                print::err(format!("Backup failed to connect: {}", e));
                return died;
            }
            Err(_) => {
                print::err(format!("Backup did not connect within {:?}", self.connect_timeout));
                return died;
            }
        };
        print::ok(format!("Backup connected on port {}", self.port));

        let reason = heartbeat(stream, PRIMARY_TOKEN, self.period, self.silence).await;
        print::warn(format!("Backup died: {}", reason));
        died
    }
}

/// Backup side of the heartbeat link.
pub struct BackupNotifier {
    port: u16,
    period: Duration,
    silence: Duration,
}

impl BackupNotifier {
    pub fn new(port: u16, settings: &DispatcherSettings) -> Self {
        BackupNotifier {
            port,
            period: settings.heartbeat_period,
            silence: settings.heartbeat_timeout,
        }
    }

    /// Connects to the primary and heartbeats until it dies.
    ///
    /// A primary that cannot be reached within the silence timeout is already dead.
    pub async fn run(self) -> ProcessDied {
        let died = ProcessDied { primary: true };
        let deadline = Instant::now() + self.silence;

        let stream = loop {
            match TcpStream::connect((config::HEARTBEAT_HOST, self.port)).await {
                Ok(stream) => break stream,
                Err(e) if Instant::now() < deadline => {
                    print::warn(format!("Primary not reachable yet on port {}: {}", self.port, e));
                    sleep(self.period).await;
                }
                Err(e) => {
                    print::err(format!("Could not reach primary on port {}: {}", self.port, e));
                    return died;
                }
            }
        };
        print::ok(format!("Connected to primary on port {}", self.port));

        let reason = heartbeat(stream, BACKUP_TOKEN, self.period, self.silence).await;
        print::warn(format!("Primary died: {}", reason));
        died
    }
}

/// Reads whatever the partner sent, then writes one token, every `period`.
///
/// ## Returns
/// Why the link is considered dead.
async fn heartbeat(stream: TcpStream, token: &str, period: Duration, silence: Duration) -> String {
    let _ = stream.set_nodelay(true);
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let line = format!("{}\n", token);

    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_heard = Instant::now();

    loop {
        tokio::select! {
            read = lines.next_line() => match read {
                Ok(Some(_)) => last_heard = Instant::now(),
                Ok(None) => return "connection closed".to_string(),
                Err(e) => return format!("read failed: {}", e),
            },
            _ = ticker.tick() => {
                if last_heard.elapsed() > silence {
                    return format!("silent for more than {:?}", silence);
                }
                if let Err(e) = write_half.write_all(line.as_bytes()).await {
                    return format!("write failed: {}", e);
                }
            }
        }
    }
}
