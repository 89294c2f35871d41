//! Output formatting utilities for the CLI
//!
//! Machine tables, proxy client config blocks and colored status messages.
//! Every helper has a `write_*` form taking any writer so the console can
//! be driven against an in-memory buffer.

use std::io::{self, Write};

use tabled::{settings::Style, Table, Tabled};

use cp_fleet::reports;
use cp_fleet::MachineSnapshot;

/// Format machines as an ASCII table
///
/// The header is always present, even with no machines.
pub fn format_machines(machines: &[MachineSnapshot]) -> String {
    #[derive(Tabled)]
    struct MachineRow {
        #[tabled(rename = "ID")]
        id: usize,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "REGION")]
        region: String,
        #[tabled(rename = "ADDRESS")]
        address: String,
        #[tabled(rename = "LISTENER")]
        listener: String,
        #[tabled(rename = "ACTIVE")]
        active: bool,
    }

    let rows: Vec<MachineRow> = machines
        .iter()
        .map(|m| MachineRow {
            id: m.id.get(),
            name: m.name.clone(),
            region: m.region.clone(),
            address: if m.is_ready() {
                m.address.clone()
            } else {
                "-".to_string()
            },
            listener: m
                .listener_port
                .map(|p| format!("{}:{}", reports::LOCAL_HOST, p))
                .unwrap_or_else(|| "-".to_string()),
            active: m.tunnel_active(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// Write the proxychains and socksd blocks for `ports`
pub fn write_reports<W: Write>(out: &mut W, ports: &[u16]) -> io::Result<()> {
    writeln!(out, "proxychains config")?;
    write!(out, "{}", reports::proxychains(ports))?;
    writeln!(out, "socksd config")?;
    write!(out, "{}", reports::socksd(ports))?;
    out.flush()
}

fn write_colored<W: Write>(
    out: &mut W,
    color: crossterm::style::Color,
    symbol: &str,
    msg: &str,
) -> io::Result<()> {
    use crossterm::style::{Print, ResetColor, SetForegroundColor};

    crossterm::queue!(
        out,
        SetForegroundColor(color),
        Print(symbol),
        ResetColor,
        Print(msg),
        Print("\n")
    )?;
    out.flush()
}

/// Write a success message in green with a checkmark prefix
pub fn write_success<W: Write>(out: &mut W, msg: &str) -> io::Result<()> {
    write_colored(out, crossterm::style::Color::Green, "✓ ", msg)
}

/// Write an error message in red with an X prefix
pub fn write_error<W: Write>(out: &mut W, msg: &str) -> io::Result<()> {
    write_colored(out, crossterm::style::Color::Red, "✗ ", msg)
}

/// Write a warning message in yellow with a warning symbol prefix
pub fn write_warning<W: Write>(out: &mut W, msg: &str) -> io::Result<()> {
    write_colored(out, crossterm::style::Color::Yellow, "⚠ ", msg)
}

/// Write an informational message in cyan with an info symbol prefix
pub fn write_info<W: Write>(out: &mut W, msg: &str) -> io::Result<()> {
    write_colored(out, crossterm::style::Color::Cyan, "ℹ ", msg)
}

/// Print a success message to stdout
pub fn print_success(msg: &str) {
    let _ = write_success(&mut io::stdout(), msg);
}

/// Print a warning message to stderr
pub fn print_warning(msg: &str) {
    let _ = write_warning(&mut io::stderr(), msg);
}

/// Print an informational message to stdout
pub fn print_info(msg: &str) {
    let _ = write_info(&mut io::stdout(), msg);
}
