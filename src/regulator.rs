//! ## Regulator
//!
//! Wires the process-pair monitor to the coordinator.
//!
//! - Started without a port: become primary at once, serve elevators from a fresh
//!   log, and keep a backup alive, launching a new one every time the old one dies.
//! - Started with a port: be the backup of whoever listens there. When that primary
//!   dies, promote, serve elevators from the recovered log, and start guarding a
//!   backup of our own.
//!
//! Only one dispatcher serves elevators at a time: a backup never starts a
//! coordinator before it is promoted, and promotion happens once.

use std::sync::Arc;

use anyhow::Context;
use once_cell::sync::OnceCell;

use crate::backup::{BackupLauncher, BackupNotifier, PrimaryNotifier, Role, RoleCell};
use crate::config::DispatcherSettings;
use crate::dispatch::coordinator::Coordinator;
use crate::display::StatusDisplay;
use crate::print;

pub struct Regulator {
    settings: DispatcherSettings,
    display: Arc<dyn StatusDisplay>,
    launcher: Arc<dyn BackupLauncher>,
    /// Heartbeat port of the primary, if started as a backup
    backup_of: Option<u16>,
    role: RoleCell,
    coordinator: OnceCell<Arc<Coordinator>>,
}

impl Regulator {
    pub fn new(
        settings: DispatcherSettings,
        display: Arc<dyn StatusDisplay>,
        launcher: Arc<dyn BackupLauncher>,
        backup_of: Option<u16>,
    ) -> Self {
        let role = if backup_of.is_some() { Role::Backup } else { Role::Primary };
        Regulator {
            settings,
            display,
            launcher,
            backup_of,
            role: RoleCell::new(role),
            coordinator: OnceCell::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role.get()
    }

    /// The coordinator, once this process serves elevators.
    pub fn coordinator(&self) -> Option<Arc<Coordinator>> {
        self.coordinator.get().cloned()
    }

    /// Runs this process for the rest of its life, as whatever [Regulator::new] made it.
    ///
    /// ## Returns
    /// Only on a setup failure as primary (e.g. the elevator port is taken).
    pub async fn run(&self) -> anyhow::Result<()> {
        match self.backup_of {
            None => {
                self.display.mode(Role::Primary);
                self.serve(false).await
            }
            Some(port) => {
                self.display.mode(Role::Backup);
                print::info(format!("Starting as backup of the primary on port {}", port));
                let died = BackupNotifier::new(port, &self.settings).run().await;
                self.display.event("Primary died");
                if died.primary && self.role.promote() {
                    print::ok("Primary died, promoting backup to primary!".to_string());
                    self.display.mode(Role::Primary);
                    self.serve(true).await
                } else {
                    print::cosmic_err("regulator::run promotion".to_string());
                    Ok(())
                }
            }
        }
    }

    async fn serve(&self, recovering: bool) -> anyhow::Result<()> {
        let coordinator = Coordinator::start(self.settings.clone(), self.display.clone(), recovering)
            .await
            .context("starting the dispatch coordinator")?;
        let _ = self.coordinator.set(coordinator);

        loop {
            let notifier = match PrimaryNotifier::bind(&self.settings) {
                Ok(n) => n,
                Err(e) => {
                    print::err(format!("Could not open heartbeat port: {}", e));
                    tokio::time::sleep(self.settings.heartbeat_timeout).await;
                    continue;
                }
            };
            notifier.run(self.launcher.as_ref()).await;
            self.display.event("Backup died, restarting it");
            tokio::time::sleep(self.settings.heartbeat_timeout).await;
        }
    }
}
