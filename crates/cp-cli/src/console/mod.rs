//! Interactive operator console
//!
//! Reads one command per line and dispatches it against the machine
//! registry. The console is `Running` until `q` (or end of input) moves it
//! to `ShuttingDown`, which runs the shared, exactly-once fleet teardown.

mod command;

pub use command::{parse_command, Command, CommandError};

use std::io::{self, Write};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use cp_core::types::{MachineId, ShutdownTrigger};
use cp_fleet::{CleanupCoordinator, MachineRegistry, TunnelLauncher};

use crate::output::{
    format_machines, write_error, write_info, write_reports, write_success, write_warning,
};

/// Help text shown by `h`
pub const HELP: &str = "\
l              List current machines and connections
c [id] [port]  Create a socks proxy using the ID and then port
d [id]         Disconnect socks proxy via the host ID
p              Print proxychains and socksd configs
q              Quit program
h              This message";

const PROMPT: &str = "[L]ist [C]onnect [D]isconnect [P]roxies [Q]uit [H]elp: ";

/// Console lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleState {
    /// Accepting commands
    Running,
    /// Teardown started; terminal
    ShuttingDown,
}

/// Line-oriented command loop over a machine registry
pub struct ConsoleController {
    registry: Arc<MachineRegistry>,
    launcher: TunnelLauncher,
    coordinator: Arc<CleanupCoordinator>,
    state: ConsoleState,
    exit: Option<ShutdownTrigger>,
}

impl ConsoleController {
    /// Console over `registry`, opening tunnels with `launcher`
    pub fn new(
        registry: Arc<MachineRegistry>,
        launcher: TunnelLauncher,
        coordinator: Arc<CleanupCoordinator>,
    ) -> Self {
        Self {
            registry,
            launcher,
            coordinator,
            state: ConsoleState::Running,
            exit: None,
        }
    }

    /// Current state
    pub fn state(&self) -> ConsoleState {
        self.state
    }

    /// Run until shutdown, returning the trigger that won the teardown
    pub async fn run<R, W>(&mut self, input: R, out: &mut W) -> io::Result<ShutdownTrigger>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
    {
        let mut lines = input.lines();
        let separator = "-".repeat(60);

        while self.state == ConsoleState::Running {
            writeln!(out, "{}", separator)?;
            write!(out, "{}", PROMPT)?;
            out.flush()?;

            match lines.next_line().await? {
                Some(line) => self.handle_line(&line, out).await?,
                None => {
                    // End of input behaves like `q`
                    writeln!(out)?;
                    self.quit(out).await?;
                }
            }
        }

        Ok(self.exit.unwrap_or(ShutdownTrigger::Quit))
    }

    /// Handle one input line
    pub async fn handle_line<W: Write>(&mut self, line: &str, out: &mut W) -> io::Result<()> {
        if self.state == ConsoleState::ShuttingDown {
            return Ok(());
        }
        // An interrupt already owns the teardown; wait for it instead of
        // touching machines that are being destroyed
        if self.coordinator.is_shutting_down() {
            return self.quit(out).await;
        }

        let command = match parse_command(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::debug!("Rejected console input {:?}: {}", line, e);
                return write_error(out, &e.to_string());
            }
        };

        match command {
            Command::List => self.list(out).await,
            Command::Connect { id, port } => self.connect(id, port, out).await,
            Command::Disconnect { id } => self.disconnect(id, out).await,
            Command::Proxies => write_reports(out, &self.registry.active_ports().await),
            Command::Help => writeln!(out, "\n{}", HELP),
            Command::Quit => self.quit(out).await,
        }
    }

    async fn list<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let machines = self.registry.snapshot().await;
        writeln!(out, "{}", format_machines(&machines))
    }

    async fn connect<W: Write>(&self, id: MachineId, port: u16, out: &mut W) -> io::Result<()> {
        let Some(machine) = self.registry.find_by_id(id) else {
            tracing::debug!("Connect: no machine with id {}", id);
            return Ok(());
        };

        match machine.start_tunnel(&self.launcher, port).await {
            Ok(()) => write_success(
                out,
                &format!("SOCKS proxy for {} listening on 127.0.0.1:{}", machine.name(), port),
            ),
            Err(e) if e.is_state_warning() => write_warning(out, &e.to_string()),
            Err(e) => {
                tracing::warn!("{}", e);
                write_error(out, &e.to_string())
            }
        }
    }

    async fn disconnect<W: Write>(&self, id: MachineId, out: &mut W) -> io::Result<()> {
        let Some(machine) = self.registry.find_by_id(id) else {
            tracing::debug!("Disconnect: no machine with id {}", id);
            return Ok(());
        };

        match machine.stop_tunnel().await {
            Ok(()) => write_success(out, &format!("Disconnected {}", machine.name())),
            // A failed kill still clears the tunnel
            Err(e) => write_warning(out, &e.to_string()),
        }
    }

    async fn quit<W: Write>(&mut self, out: &mut W) -> io::Result<()> {
        self.state = ConsoleState::ShuttingDown;
        write_info(out, "Cleaning up, and exiting")?;

        let winner = self.coordinator.shutdown(ShutdownTrigger::Quit).await;
        self.exit = Some(winner);
        Ok(())
    }
}
