use anyhow::{Context, anyhow, bail};
use clap::{Args, Parser, Subcommand};
use std::str::FromStr;
use std::time::Duration;

use crate::bus::{DeviceType, Endpoint};
use crate::dispatch::{MAX_JOBS, Plan, Timing};
use crate::port::DEFAULT_BAUD;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "efp-dispatch",
    about = "Distribute pi digit batches to bus-attached compute peers"
)]
pub struct Cli {
    /// Debug logging (RUST_LOG overrides)
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub cmd: Cmd,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Cmd {
    /// Run the controller until every job is collected
    Run(RunOpts),
    /// Ping every configured worker
    Ping(OneShotOpts),
    /// Abort whatever the named workers are computing
    Cancel(OneShotOpts),
    /// Serve the register protocol on a UART as a compute peer
    Peer(PeerOpts),
    /// Print digits of pi locally
    Digits(DigitsOpts),
}

/// `name:type[:target]`, e.g. `p0:photon:0x08`, `m1:mbed:9`, `u0:serial:/dev/ttyUSB0`, `s0:sim`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSpec {
    pub name: String,
    pub device_type: DeviceType,
    pub endpoint: Endpoint,
}

impl FromStr for WorkerSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.splitn(3, ':');
        let name = parts.next().unwrap_or_default();
        if name.is_empty() {
            bail!("worker spec {:?}: empty name", s);
        }
        let ty = parts
            .next()
            .ok_or_else(|| anyhow!("worker spec {:?}: expected name:type[:target]", s))?;
        let device_type = ty.parse::<DeviceType>().map_err(|_| {
            anyhow!(
                "worker spec {:?}: unknown type {:?} (photon, mbed, serial, sim)",
                s,
                ty
            )
        })?;
        let target = parts.next();

        let endpoint = match (device_type, target) {
            (kind, Some(t)) if kind.is_i2c() => {
                let addr = parse_address(t)
                    .with_context(|| format!("worker spec {:?}: bad address", s))?;
                Endpoint::Address(addr)
            }
            (DeviceType::Serial, Some(t)) if !t.is_empty() => Endpoint::Path(t.to_string()),
            (DeviceType::Sim, _) => Endpoint::Local,
            (_, _) => bail!("worker spec {:?}: {} needs a target", s, device_type),
        };

        Ok(Self {
            name: name.to_string(),
            device_type,
            endpoint,
        })
    }
}

/// 7-bit bus address, `0x..` hex or decimal.
fn parse_address(s: &str) -> anyhow::Result<u16> {
    let addr = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => s.parse::<u16>()?,
    };
    if addr > 0x7f {
        bail!("address 0x{:x} is not 7-bit", addr);
    }
    Ok(addr)
}

#[derive(Args, Debug, Clone)]
pub struct BusOpts {
    /// i2c adapter shared by photon/mbed workers
    #[arg(long, default_value = "/dev/i2c-1")]
    pub bus: String,
    /// Worker as name:type[:target]; repeat for each worker
    #[arg(long = "worker", value_name = "NAME:TYPE[:TARGET]", required = true)]
    pub workers: Vec<WorkerSpec>,
}

#[derive(Args, Debug, Clone)]
pub struct RunOpts {
    #[command(flatten)]
    pub bus: BusOpts,
    /// Digits per job
    #[arg(long, default_value_t = 5)]
    pub batch: u8,
    /// Number of jobs
    #[arg(long, default_value_t = 30)]
    pub jobs: usize,
    #[arg(long, default_value_t = 500)]
    pub order_timeout_ms: u64,
    #[arg(long, default_value_t = 500)]
    pub acquire_timeout_ms: u64,
    #[arg(long, default_value_t = 5000)]
    pub status_timeout_ms: u64,
    #[arg(long, default_value_t = 100)]
    pub result_timeout_ms: u64,
    #[arg(long, default_value_t = 100)]
    pub reset_timeout_ms: u64,
    /// Sleep between poll passes
    #[arg(long, default_value_t = 10)]
    pub poll_ms: u64,
    /// Polls without completion before a worker is reset and its job requeued
    #[arg(long, default_value_t = 100)]
    pub stall_polls: u32,
    /// Give up after this many seconds
    #[arg(long)]
    pub deadline_s: Option<u64>,
    /// Redraw the three-column log view once a second
    #[arg(long, default_value_t = false)]
    pub dashboard: bool,
    /// Accept `cancel <worker>` lines on stdin while running
    #[arg(long, default_value_t = false)]
    pub control: bool,
}

impl RunOpts {
    pub fn plan(&self) -> anyhow::Result<Plan> {
        Plan::new(self.batch, self.jobs)
            .with_context(|| format!("--batch/--jobs (jobs at most {})", MAX_JOBS))
    }

    pub fn timing(&self) -> anyhow::Result<Timing> {
        if self.stall_polls == 0 {
            bail!("--stall-polls must be at least 1");
        }
        Ok(Timing {
            acquire: Duration::from_millis(self.acquire_timeout_ms),
            order: Duration::from_millis(self.order_timeout_ms),
            reset: Duration::from_millis(self.reset_timeout_ms),
            status: Duration::from_millis(self.status_timeout_ms),
            result: Duration::from_millis(self.result_timeout_ms),
            throttle: Duration::from_millis(self.poll_ms),
            stall_limit: self.stall_polls,
        })
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_s.map(Duration::from_secs)
    }
}

#[derive(Args, Debug, Clone)]
pub struct OneShotOpts {
    #[command(flatten)]
    pub bus: BusOpts,
    /// Ack timeout per request
    #[arg(long, default_value_t = 500)]
    pub timeout_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct PeerOpts {
    /// Serial device path
    #[arg(long, default_value = "/dev/ttyS0")]
    pub dev: String,
    /// Baud rate
    #[arg(long, default_value_t = DEFAULT_BAUD)]
    pub baud: u32,
    /// Digits per job; must match the controller
    #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..))]
    pub batch: u8,
}

#[derive(Args, Debug, Clone)]
pub struct DigitsOpts {
    /// First position after the decimal point (1-based)
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub start: u32,
    #[arg(long, default_value_t = 50)]
    pub count: u32,
}
