#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::process::{Command, ExitStatus};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::{Condvar, Mutex};
use windowed_cache::core::config::Config;
use windowed_cache::source::{DirtyObserver, Source};
use windowed_cache::window::notifier::CacheListener;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Small-window config with a short dirty delay.
pub fn config(capacity: usize, slack: usize, batch_max: usize) -> Config {
    let mut config = Config::default();
    config.window.capacity = capacity;
    config.window.reload_slack = slack;
    config.window.batch_max = batch_max;
    config.loader.dirty_delay_ms = 5;
    config
}

pub const SETTLE: Duration = Duration::from_secs(5);

/// Poll `done` until it holds, pumping with `pump` in between.
pub fn wait_until<T>(target: &mut T, mut pump: impl FnMut(&mut T), done: impl Fn(&T) -> bool) {
    let deadline = Instant::now() + SETTLE;
    loop {
        pump(target);
        if done(target) {
            return;
        }
        assert!(Instant::now() < deadline, "condition never held");
        std::thread::sleep(Duration::from_millis(2));
    }
}

// ---------------------------------------------------------------------------
// Recording listener
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<V> {
    Size(usize),
    Content {
        index: usize,
        old: Option<V>,
        new: V,
    },
}

/// Listener that records every callback; clones share one log.
#[derive(Debug)]
pub struct RecordingListener<V> {
    events: Arc<Mutex<Vec<Event<V>>>>,
}

impl<V> Clone for RecordingListener<V> {
    fn clone(&self) -> Self {
        Self {
            events: Arc::clone(&self.events),
        }
    }
}

impl<V> Default for RecordingListener<V> {
    fn default() -> Self {
        Self {
            events: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<V: Clone> RecordingListener<V> {
    pub fn take(&self) -> Vec<Event<V>> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn content_indices(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Content { index, .. } => Some(*index),
                Event::Size(_) => None,
            })
            .collect()
    }

    pub fn sizes(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Event::Size(size) => Some(*size),
                Event::Content { .. } => None,
            })
            .collect()
    }
}

impl<V: Clone + Send> CacheListener<V> for RecordingListener<V> {
    fn on_size_changed(&mut self, size: usize) {
        self.events.lock().push(Event::Size(size));
    }

    fn on_content_changed(&mut self, index: usize, old: Option<&V>, new: &V) {
        self.events.lock().push(Event::Content {
            index,
            old: old.cloned(),
            new: new.clone(),
        });
    }
}

// ---------------------------------------------------------------------------
// Probe source: counting, optionally gated
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ProbeState {
    records: Mutex<Vec<u32>>,
    changed: AtomicBool,
    reloads: AtomicUsize,
    fetches: Mutex<Vec<(usize, usize)>>,
    gate_open: Mutex<bool>,
    gate_cv: Condvar,
    observer: Mutex<Option<DirtyObserver>>,
}

/// Source over `0..len` that records every call.
///
/// A gated probe blocks each `fetch_range` until [`Probe::open_gate`].
#[derive(Debug)]
pub struct ProbeSource {
    state: Arc<ProbeState>,
}

/// Test-side view of a [`ProbeSource`].
#[derive(Debug, Clone)]
pub struct Probe {
    state: Arc<ProbeState>,
}

impl ProbeSource {
    pub fn new(len: u32) -> (Self, Probe) {
        Self::build(len, true)
    }

    pub fn gated(len: u32) -> (Self, Probe) {
        Self::build(len, false)
    }

    fn build(len: u32, gate_open: bool) -> (Self, Probe) {
        let state = Arc::new(ProbeState {
            records: Mutex::new((0..len).collect()),
            gate_open: Mutex::new(gate_open),
            ..ProbeState::default()
        });
        (
            Self {
                state: Arc::clone(&state),
            },
            Probe { state },
        )
    }
}

impl Probe {
    pub fn open_gate(&self) {
        *self.state.gate_open.lock() = true;
        self.state.gate_cv.notify_all();
    }

    pub fn fetches(&self) -> Vec<(usize, usize)> {
        self.state.fetches.lock().clone()
    }

    pub fn reloads(&self) -> usize {
        self.state.reloads.load(Ordering::SeqCst)
    }

    /// Replace the records; the next reload reports a change.
    pub fn set_records(&self, records: Vec<u32>) {
        *self.state.records.lock() = records;
        self.state.changed.store(true, Ordering::SeqCst);
    }

    /// Fire the registered observer.
    pub fn notify(&self) {
        let observer = self.state.observer.lock().clone();
        if let Some(observer) = observer {
            observer.notify();
        }
    }
}

impl Source for ProbeSource {
    type Item = u32;

    fn size(&self) -> usize {
        self.state.records.lock().len()
    }

    fn reload(&mut self) -> bool {
        self.state.reloads.fetch_add(1, Ordering::SeqCst);
        self.state.changed.swap(false, Ordering::SeqCst)
    }

    fn fetch_range(&mut self, start: usize, count: usize) -> Vec<u32> {
        self.state.fetches.lock().push((start, count));
        {
            let mut open = self.state.gate_open.lock();
            while !*open {
                self.state.gate_cv.wait(&mut open);
            }
        }
        let records = self.state.records.lock();
        let end = start.saturating_add(count).min(records.len());
        records.get(start..end).map(<[u32]>::to_vec).unwrap_or_default()
    }

    fn register_observer(&mut self, observer: DirtyObserver) {
        *self.state.observer.lock() = Some(observer);
    }
}

// ---------------------------------------------------------------------------
// CLI runner
// ---------------------------------------------------------------------------

pub struct CmdResult {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
    pub log_path: PathBuf,
}

fn now_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis())
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn resolve_bin_path() -> PathBuf {
    if let Ok(path) = std::env::var("CARGO_BIN_EXE_wcache") {
        return PathBuf::from(path);
    }

    let exe_name = if cfg!(windows) { "wcache.exe" } else { "wcache" };
    let fallback = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(PathBuf::from))
        .and_then(|deps| deps.parent().map(PathBuf::from))
        .map(|debug_dir| debug_dir.join(exe_name));

    match fallback {
        Some(path) if path.exists() => path,
        _ => panic!("unable to resolve wcache binary path for integration test"),
    }
}

pub fn run_cli_case(case_name: &str, args: &[&str]) -> CmdResult {
    let root = std::env::temp_dir().join("wcache-test-logs");
    fs::create_dir_all(&root).expect("create temp test log dir");

    let log_path = root.join(format!("{}-{}.log", sanitize(case_name), now_millis()));
    let bin_path = resolve_bin_path();

    let output = Command::new(&bin_path)
        .args(args)
        .env("WCACHE_LOG", "warn")
        .env("RUST_BACKTRACE", "1")
        .output()
        .expect("execute wcache command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    let mut log_content = String::new();
    log_content.push_str(&format!("case={case_name}\n"));
    log_content.push_str(&format!("bin={}\n", bin_path.display()));
    log_content.push_str(&format!("args={args:?}\n"));
    log_content.push_str(&format!("status={}\n", output.status));
    log_content.push_str("----- stdout -----\n");
    log_content.push_str(&stdout);
    log_content.push('\n');
    log_content.push_str("----- stderr -----\n");
    log_content.push_str(&stderr);
    log_content.push('\n');
    fs::write(&log_path, log_content).expect("write test log");

    CmdResult {
        status: output.status,
        stdout,
        stderr,
        log_path,
    }
}
