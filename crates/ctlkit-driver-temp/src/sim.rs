//! Simulated temperature controller.
//!
//! A TCP server speaking the same line protocol as the real device. Each channel ramps its
//! temperature from `start` towards `end` at `ramp_rate` units per second while enabled,
//! and disables itself once `end` is reached.
//!
//! | Code | Query (`X01?`) | Write (`X01=v`) |
//! |------|----------------|-----------------|
//! | `R`  | ramp rate (no channel) | set ramp rate |
//! | `S`  | start | set start |
//! | `E`  | end | set end |
//! | `T`  | current temperature | - |
//! | `N`  | enabled (`0`/`1`) | enable with `1`/`Y`, disable with `0`/`N`; enabling resets to start |
//!
//! Channels are numbered from `01`. Writes get no response; an unanswerable query gets
//! `ERR`.
//!
//! # Example
//! ```no_run
//! use ctlkit_driver_temp::sim::{SimSettings, TempControllerSim};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let sim = TempControllerSim::new(SimSettings::default()).bind("127.0.0.1:25565").await?;
//! println!("simulator on {}", sim.local_addr());
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::task::JoinHandle;
use tokio::time::Instant;

static COMMAND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Z])(\d{2})?(?:(\?)|=(.+))$").expect("Invalid command regex"));

fn default_num_ramp_controllers() -> usize {
    4
}

fn default_end() -> f64 {
    50.0
}

fn default_ramp_rate() -> f64 {
    1.0
}

fn default_tick_ms() -> u64 {
    100
}

/// Simulated device parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSettings {
    /// Number of channels.
    #[serde(default = "default_num_ramp_controllers")]
    pub num_ramp_controllers: usize,
    /// Initial start value of every channel.
    #[serde(default)]
    pub default_start: f64,
    /// Initial end value of every channel.
    #[serde(default = "default_end")]
    pub default_end: f64,
    /// Units per second.
    #[serde(default = "default_ramp_rate")]
    pub ramp_rate: f64,
    /// Ramp integration step.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            num_ramp_controllers: default_num_ramp_controllers(),
            default_start: 0.0,
            default_end: default_end(),
            ramp_rate: default_ramp_rate(),
            tick_ms: default_tick_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Channel {
    start: f64,
    end: f64,
    current: f64,
    enabled: bool,
}

/// Device state, independent of any I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct SimState {
    ramp_rate: f64,
    channels: Vec<Channel>,
}

impl SimState {
    /// Fresh state from `settings`.
    pub fn new(settings: &SimSettings) -> Self {
        let channel = Channel {
            start: settings.default_start,
            end: settings.default_end,
            current: 0.0,
            enabled: false,
        };
        Self {
            ramp_rate: settings.ramp_rate,
            channels: vec![channel; settings.num_ramp_controllers],
        }
    }

    /// Current temperature of channel `channel` (1-based).
    pub fn current(&self, channel: usize) -> Option<f64> {
        self.channel(channel).map(|c| c.current)
    }

    /// Whether channel `channel` (1-based) is ramping.
    pub fn enabled(&self, channel: usize) -> Option<bool> {
        self.channel(channel).map(|c| c.enabled)
    }

    /// Ramp rate in units per second.
    pub fn ramp_rate(&self) -> f64 {
        self.ramp_rate
    }

    fn channel(&self, channel: usize) -> Option<&Channel> {
        channel.checked_sub(1).and_then(|i| self.channels.get(i))
    }

    fn channel_mut(&mut self, channel: usize) -> Option<&mut Channel> {
        channel.checked_sub(1).and_then(|i| self.channels.get_mut(i))
    }

    /// Advance every enabled channel by `dt`.
    pub fn tick(&mut self, dt: Duration) {
        let step = self.ramp_rate * dt.as_secs_f64();
        for channel in self.channels.iter_mut().filter(|c| c.enabled) {
            if channel.current < channel.end {
                channel.current = (channel.current + step).min(channel.end);
            }
            if channel.current >= channel.end {
                channel.enabled = false;
            }
        }
    }

    /// Apply one request line. Returns the response line for queries.
    pub fn handle_line(&mut self, line: &str) -> Option<String> {
        let Some(caps) = COMMAND.captures(line.trim()) else {
            tracing::warn!(line, "unknown command");
            return Some("ERR".to_string());
        };
        let code = caps.get(1).map_or("", |m| m.as_str());
        let channel = caps.get(2).and_then(|m| m.as_str().parse::<usize>().ok());
        let query = caps.get(3).is_some();
        let value = caps.get(4).map(|m| m.as_str().trim());

        let reply = match (code, channel, value) {
            ("R", None, None) if query => Some(self.ramp_rate.to_string()),
            ("R", None, Some(v)) => {
                if let Some(rate) = parse_number(v) {
                    self.ramp_rate = rate;
                }
                None
            }
            (_, Some(ch), _) if self.channel(ch).is_none() => {
                tracing::warn!(line, channel = ch, "no such channel");
                query.then(|| "ERR".to_string())
            }
            ("S", Some(ch), None) => self.channel(ch).map(|c| c.start.to_string()),
            ("E", Some(ch), None) => self.channel(ch).map(|c| c.end.to_string()),
            ("T", Some(ch), None) => self.channel(ch).map(|c| c.current.to_string()),
            ("N", Some(ch), None) => self.channel(ch).map(|c| u8::from(c.enabled).to_string()),
            ("S", Some(ch), Some(v)) => {
                if let (Some(c), Some(v)) = (self.channel_mut(ch), parse_number(v)) {
                    c.start = v;
                }
                None
            }
            ("E", Some(ch), Some(v)) => {
                if let (Some(c), Some(v)) = (self.channel_mut(ch), parse_number(v)) {
                    c.end = v;
                }
                None
            }
            ("N", Some(ch), Some(v)) => {
                match (self.channel_mut(ch), parse_flag(v)) {
                    (Some(c), Some(true)) => {
                        c.current = c.start;
                        c.enabled = true;
                    }
                    (Some(c), Some(false)) => c.enabled = false,
                    _ => tracing::warn!(line, "bad enable value"),
                }
                None
            }
            _ => {
                tracing::warn!(line, "unsupported command");
                query.then(|| "ERR".to_string())
            }
        };
        tracing::debug!(request = line.trim(), response = ?reply, "handled");
        reply
    }
}

fn parse_number(v: &str) -> Option<f64> {
    v.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn parse_flag(v: &str) -> Option<bool> {
    match v {
        "1" | "Y" | "y" => Some(true),
        "0" | "N" | "n" => Some(false),
        _ => None,
    }
}

/// Simulated device, not yet listening.
#[derive(Debug, Clone)]
pub struct TempControllerSim {
    settings: SimSettings,
}

impl TempControllerSim {
    /// Simulator with the given parameters.
    pub fn new(settings: SimSettings) -> Self {
        Self { settings }
    }

    /// Listen on `addr` and start the ramp clock.
    pub async fn bind<A: ToSocketAddrs>(self, addr: A) -> Result<SimHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .context("failed to bind simulator socket")?;
        let local_addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(SimState::new(&self.settings)));
        let tick = Duration::from_millis(self.settings.tick_ms.max(1));

        let ramp = tokio::spawn(ramp_loop(state.clone(), tick));
        let server = tokio::spawn(accept_loop(listener, state.clone()));
        tracing::info!(%local_addr, channels = self.settings.num_ramp_controllers, "simulator listening");

        Ok(SimHandle {
            local_addr,
            state,
            tasks: vec![ramp, server],
        })
    }
}

async fn ramp_loop(state: Arc<Mutex<SimState>>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    let mut last = Instant::now();
    loop {
        interval.tick().await;
        let now = Instant::now();
        state.lock().tick(now - last);
        last = now;
    }
}

async fn accept_loop(listener: TcpListener, state: Arc<Mutex<SimState>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "client connected");
                tokio::spawn(serve_client(stream, state.clone()));
            }
            Err(e) => tracing::warn!(error = %e, "accept failed"),
        }
    }
}

async fn serve_client(stream: TcpStream, state: Arc<Mutex<SimState>>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "client read failed");
                break;
            }
        };
        let reply = state.lock().handle_line(&line);
        if let Some(reply) = reply {
            if let Err(e) = writer.write_all(format!("{}\r\n", reply).as_bytes()).await {
                tracing::warn!(error = %e, "client write failed");
                break;
            }
        }
    }
    tracing::debug!("client disconnected");
}

/// A running simulator. Dropping it stops the server.
#[derive(Debug)]
pub struct SimHandle {
    local_addr: SocketAddr,
    state: Arc<Mutex<SimState>>,
    tasks: Vec<JoinHandle<()>>,
}

impl SimHandle {
    /// Address the server listens on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Snapshot of the device state.
    pub fn state(&self) -> SimState {
        self.state.lock().clone()
    }

    /// Stop accepting clients and stop ramping.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for SimHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
