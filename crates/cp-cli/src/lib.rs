//! cloud-proxy: Command-line front end
//!
//! Provides the interactive console that lists, connects and disconnects
//! the SOCKS tunnels of a running fleet, and the terminal output helpers.

pub mod console;
pub mod output;
