//! Kernel-probe backend: dynamic kprobes on the socket send/receive paths, registered through
//! tracefs, with events read back from `trace_pipe` by a background ingestion task.
//!
//! Requires root (or CAP_SYS_ADMIN on tracefs) and a kernel with kprobe events. Any failure
//! during [`ActivitySource::attach`] leaves nothing registered and is reported as
//! [`MonitorError::BackendUnavailable`].

use super::{lock, ActivitySource, TrafficCounters};
use crate::error::{DecodeError, MonitorError};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

/// Bytes credited per receive event. `tcp_recvmsg` only sees the caller's buffer length at
/// entry, not the number of bytes actually received, so receive accounting is an estimate.
pub const RECV_ESTIMATE_BYTES: u64 = 1024;

/// Longest wait for one trace line before the running flag is checked again.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Longest wait in [`ActivitySource::detach`] for the ingestion task to exit.
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

const GROUP: &str = "carbonwatch";
const TRACEFS_CANDIDATES: [&str; 2] = ["/sys/kernel/tracing", "/sys/kernel/debug/tracing"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    TcpSend,
    TcpRecv,
    UdpSend,
}

impl EventKind {
    pub const ALL: [EventKind; 3] = [EventKind::TcpSend, EventKind::TcpRecv, EventKind::UdpSend];

    pub fn event_name(self) -> &'static str {
        match self {
            EventKind::TcpSend => "cw_tcp_send",
            EventKind::TcpRecv => "cw_tcp_recv",
            EventKind::UdpSend => "cw_udp_send",
        }
    }

    fn from_event_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.event_name() == name)
    }

    pub fn is_outbound(self) -> bool {
        matches!(self, EventKind::TcpSend | EventKind::UdpSend)
    }

    /// kprobe_events definition line. Send paths fetch `size` (third argument).
    fn definition(self) -> String {
        let name = self.event_name();
        match self {
            EventKind::TcpSend => format!("p:{GROUP}/{name} tcp_sendmsg size=$arg3:u64\n"),
            EventKind::UdpSend => format!("p:{GROUP}/{name} udp_sendmsg size=$arg3:u64\n"),
            EventKind::TcpRecv => format!("p:{GROUP}/{name} tcp_recvmsg\n"),
        }
    }
}

/// One decoded trace event. `bytes` is 0 for receive events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeEvent {
    pub pid: u32,
    pub comm: String,
    pub kind: EventKind,
    pub bytes: u64,
}

/// Decode one `trace_pipe` line, e.g.
/// `  curl-4123  [003] ..... 10592.401345: cw_tcp_send: (tcp_sendmsg+0x0/0x50) size=517`
pub fn parse_trace_line(line: &str) -> Result<ProbeEvent, DecodeError> {
    let bracket = line.find(" [").ok_or(DecodeError::MissingTask)?;
    let (head, rest) = line.split_at(bracket);
    let task = strip_tgid(head.trim_end()).trim();
    let (comm, pid) = task.rsplit_once('-').ok_or(DecodeError::MissingTask)?;
    let pid: u32 = pid
        .parse()
        .map_err(|_| DecodeError::BadPid(pid.to_string()))?;

    let mut tokens = rest.split_whitespace();
    let kind = tokens
        .by_ref()
        .find_map(|t| t.strip_suffix(':').and_then(EventKind::from_event_name))
        .ok_or(DecodeError::UnknownEvent)?;

    let bytes = if kind.is_outbound() {
        let raw = tokens
            .find_map(|t| t.strip_prefix("size="))
            .ok_or_else(|| DecodeError::BadSize(String::new()))?;
        parse_size(raw).ok_or_else(|| DecodeError::BadSize(raw.to_string()))?
    } else {
        0
    };

    Ok(ProbeEvent {
        pid,
        comm: comm.to_string(),
        kind,
        bytes,
    })
}

/// With the record-tgid option the task is followed by `(  tgid)` or `(-------)`. Comms may
/// contain parentheses themselves, e.g. `(sd-pam)-1234`.
fn strip_tgid(task: &str) -> &str {
    let Some((before, tail)) = task.rsplit_once(" (") else {
        return task;
    };
    let is_tgid = tail.strip_suffix(')').is_some_and(|t| {
        let t = t.trim();
        !t.is_empty() && (t.parse::<u32>().is_ok() || t.bytes().all(|b| b == b'-'))
    });
    if is_tgid {
        before
    } else {
        task
    }
}

fn parse_size(raw: &str) -> Option<u64> {
    match raw.strip_prefix("0x") {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => raw.parse().ok(),
    }
}

pub fn apply_event(c: &mut TrafficCounters, ev: &ProbeEvent) {
    c.packet_count = c.packet_count.saturating_add(1);
    if ev.kind.is_outbound() {
        c.bytes_sent = c.bytes_sent.saturating_add(ev.bytes);
        let bucket = c.per_process.entry(ev.comm.clone()).or_default();
        bucket.packets = bucket.packets.saturating_add(1);
        bucket.bytes = bucket.bytes.saturating_add(ev.bytes);
    } else {
        c.bytes_received = c.bytes_received.saturating_add(RECV_ESTIMATE_BYTES);
    }
}

/// Event-ingestion loop. Runs until `running` is cleared, the stream ends, or a read fails.
/// The flag is re-checked under the counters lock before each event is applied, so clearing
/// it under that lock fences off any further updates. Returns the number of undecodable lines.
pub async fn ingest<R>(
    reader: R,
    counters: Arc<Mutex<TrafficCounters>>,
    running: Arc<AtomicBool>,
    poll: Duration,
) -> u64
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut skipped = 0u64;
    while running.load(Ordering::Acquire) {
        match timeout(poll, lines.next_line()).await {
            // poll timeout: loop around and re-check the flag
            Err(_) => continue,
            Ok(Ok(Some(line))) => match parse_trace_line(&line) {
                Ok(ev) => {
                    let mut c = lock(&counters);
                    if !running.load(Ordering::Acquire) {
                        break;
                    }
                    apply_event(&mut c, &ev);
                }
                Err(e) => {
                    skipped += 1;
                    trace!("skipping trace line: {e}");
                }
            },
            Ok(Ok(None)) => {
                warn!("trace_pipe closed");
                break;
            }
            Ok(Err(e)) => {
                warn!("trace_pipe read failed: {e}");
                break;
            }
        }
    }
    running.store(false, Ordering::Release);
    debug!(skipped, "event ingestion stopped");
    skipped
}

/// One attach: its own running flag, so a stale task can never be revived by a later attach.
struct Ingestion {
    running: Arc<AtomicBool>,
    task: JoinHandle<u64>,
}

pub struct KernelProbe {
    enabled: bool,
    tracefs: Option<PathBuf>,
    counters: Arc<Mutex<TrafficCounters>>,
    ingestion: Mutex<Option<Ingestion>>,
    attached_root: Mutex<Option<PathBuf>>,
}

impl KernelProbe {
    /// `tracefs`: explicit tracefs mount, or `None` to probe the usual locations.
    pub fn new(tracefs: Option<PathBuf>) -> Self {
        Self {
            enabled: true,
            tracefs,
            counters: Arc::new(Mutex::new(TrafficCounters::default())),
            ingestion: Mutex::new(None),
            attached_root: Mutex::new(None),
        }
    }

    /// A probe that never attaches.
    pub fn disabled() -> Self {
        let mut probe = Self::new(None);
        probe.enabled = false;
        probe
    }

    pub fn is_running(&self) -> bool {
        lock(&self.ingestion)
            .as_ref()
            .is_some_and(|i| i.running.load(Ordering::Acquire))
    }

    fn resolve_root(&self) -> Result<PathBuf, MonitorError> {
        let candidates: Vec<PathBuf> = match &self.tracefs {
            Some(p) => vec![p.clone()],
            None => TRACEFS_CANDIDATES.iter().map(PathBuf::from).collect(),
        };
        candidates
            .into_iter()
            .find(|p| p.join("kprobe_events").exists())
            .ok_or_else(|| {
                MonitorError::BackendUnavailable("no accessible tracefs with kprobe_events".into())
            })
    }
}

fn enable_path(root: &Path) -> PathBuf {
    root.join("events").join(GROUP).join("enable")
}

// kprobe_events must be opened for append; a truncating open clears every probe on the host.
fn write_kprobe_command(root: &Path, cmd: &str) -> io::Result<()> {
    let mut f = OpenOptions::new()
        .append(true)
        .open(root.join("kprobe_events"))?;
    f.write_all(cmd.as_bytes())
}

fn register_probes(root: &Path) -> io::Result<()> {
    for (i, kind) in EventKind::ALL.into_iter().enumerate() {
        if let Err(e) = write_kprobe_command(root, &kind.definition()) {
            for done in &EventKind::ALL[..i] {
                let _ = write_kprobe_command(root, &format!("-:{GROUP}/{}\n", done.event_name()));
            }
            return Err(e);
        }
    }
    Ok(())
}

fn wait_for_drain(task: &JoinHandle<u64>, limit: Duration) {
    // a current-thread runtime cannot run the task while this thread blocks
    if let Ok(h) = Handle::try_current() {
        if h.runtime_flavor() == RuntimeFlavor::CurrentThread {
            return;
        }
    }
    let deadline = Instant::now() + limit;
    while !task.is_finished() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    if !task.is_finished() {
        debug!("ingestion task still parked on a read after stop");
    }
}

fn teardown(root: &Path) {
    let _ = fs::write(enable_path(root), "0");
    for kind in EventKind::ALL {
        let _ = write_kprobe_command(root, &format!("-:{GROUP}/{}\n", kind.event_name()));
    }
}

impl ActivitySource for KernelProbe {
    fn name(&self) -> &'static str {
        "kernel-probe"
    }

    fn attach(&self) -> Result<(), MonitorError> {
        if !self.enabled {
            return Err(MonitorError::BackendUnavailable(
                "disabled by configuration".into(),
            ));
        }
        let handle = Handle::try_current()
            .map_err(|_| MonitorError::BackendUnavailable("no async runtime".into()))?;
        let root = self.resolve_root()?;
        self.detach();
        let unavailable = |what: &str, e: io::Error| {
            MonitorError::BackendUnavailable(format!("{what} ({}): {e}", root.display()))
        };

        // leftovers from an earlier run would make registration fail with EEXIST
        teardown(&root);
        register_probes(&root).map_err(|e| unavailable("kprobe registration", e))?;
        if let Err(e) = fs::write(enable_path(&root), "1") {
            teardown(&root);
            return Err(unavailable("enabling probes", e));
        }
        let pipe = match fs::File::open(root.join("trace_pipe")) {
            Ok(f) => f,
            Err(e) => {
                teardown(&root);
                return Err(unavailable("opening trace_pipe", e));
            }
        };

        let running = Arc::new(AtomicBool::new(true));
        let reader = BufReader::new(tokio::fs::File::from_std(pipe));
        let task = handle.spawn(ingest(
            reader,
            self.counters.clone(),
            running.clone(),
            POLL_TIMEOUT,
        ));
        *lock(&self.ingestion) = Some(Ingestion { running, task });
        *lock(&self.attached_root) = Some(root);
        Ok(())
    }

    fn detach(&self) {
        let ingestion = lock(&self.ingestion).take();
        if let Some(i) = &ingestion {
            let _fence = lock(&self.counters);
            i.running.store(false, Ordering::Release);
        }
        if let Some(root) = lock(&self.attached_root).take() {
            teardown(&root);
        }
        if let Some(i) = ingestion {
            wait_for_drain(&i.task, DRAIN_TIMEOUT);
        }
    }

    fn counters(&self) -> TrafficCounters {
        lock(&self.counters).clone()
    }
}

impl Drop for KernelProbe {
    fn drop(&mut self) {
        self.detach();
    }
}
