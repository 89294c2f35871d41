//! Proxy client configuration blocks
//!
//! Rendered once after startup and again on demand from the console, from
//! the listener ports of the tunnels that are running at that moment.

use serde::Serialize;

/// Loopback address the tunnels listen on
pub const LOCAL_HOST: &str = "127.0.0.1";

#[derive(Serialize)]
struct Upstream {
    #[serde(rename = "type")]
    kind: &'static str,
    address: String,
}

/// proxychains `[ProxyList]` lines, one per port
pub fn proxychains(ports: &[u16]) -> String {
    ports
        .iter()
        .map(|port| format!("socks5 {} {}\n", LOCAL_HOST, port))
        .collect()
}

/// socksd `upstreams` array, one entry per port
pub fn socksd(ports: &[u16]) -> String {
    let entries: Vec<String> = ports
        .iter()
        .map(|port| {
            let upstream = Upstream {
                kind: "socks5",
                address: format!("{}:{}", LOCAL_HOST, port),
            };
            serde_json::to_string(&upstream).unwrap_or_default()
        })
        .collect();

    if entries.is_empty() {
        return "\"upstreams\": [\n]\n".to_string();
    }
    format!("\"upstreams\": [\n{}\n]\n", entries.join(",\n"))
}
