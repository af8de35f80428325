//! Shared helpers for the loopback integration tests

#![allow(dead_code)]

use biosignal_io::config::ServiceConfig;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

/// Fast timings, loopback only, discovery off
pub fn fast_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.network.bind_address = "127.0.0.1:0".to_string();
    config.network.read_timeout_ms = 20;
    config.discovery.enabled = false;
    config.dispatch.flush_interval_ms = 30;
    config.dispatch.poll_interval_ms = 5;
    config.health.signal_timeout_ms = 5_000;
    config
}

/// Poll `cond` until it holds or the timeout expires
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn connect(addr: SocketAddr) -> TcpStream {
    let stream = TcpStream::connect(addr).expect("connect to service");
    stream.set_nodelay(true).expect("nodelay");
    stream
}

pub fn send_lines(stream: &mut TcpStream, lines: &[&str]) {
    let mut payload = String::new();
    for line in lines {
        payload.push_str(line);
        payload.push('\n');
    }
    stream.write_all(payload.as_bytes()).expect("write frames");
}

/// Data rows (header excluded) of a channel file, empty if missing
pub fn data_rows(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|text| text.lines().skip(1).map(str::to_string).collect())
        .unwrap_or_default()
}
