//! Monitor lifecycle and the capture worker.
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`. Control
//! operations serialize on one mutex. The worker thread is the only writer
//! of detector state; readers take the read lock just long enough to copy
//! a snapshot.

use crate::config::MonitorConfig;
use crate::detection::{Detector, DetectorStats};
use crate::error::{MonitorError, Result};
use crate::event_log::render_csv;
use crate::models::domain::{Device, SpoofEvent};
use crate::registry;
use crate::sniff::{FrameSource, SourceOpener};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    pub source: Option<String>,
    pub frames_processed: u64,
    pub malformed_frames: u64,
    pub dropped_frames: u64,
    pub devices: usize,
    pub events_logged: usize,
    pub events_evicted: u64,
    pub detector: DetectorStats,
    pub last_failure: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    malformed: AtomicU64,
    dropped: AtomicU64,
}

struct Worker {
    cancel: Arc<AtomicBool>,
    handle: JoinHandle<()>,
    source: String,
}

struct Lifecycle {
    state: MonitorState,
    worker: Option<Worker>,
    last_failure: Option<String>,
}

pub struct Monitor {
    config: MonitorConfig,
    opener: Box<dyn SourceOpener>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    detector: Arc<RwLock<Detector>>,
    counters: Arc<Counters>,
}

impl Monitor {
    pub fn new(config: MonitorConfig, opener: Box<dyn SourceOpener>) -> Result<Self> {
        config.validate()?;
        let detector = Detector::new(config.detection.clone());
        Ok(Self {
            config,
            opener,
            lifecycle: Arc::new(Mutex::new(Lifecycle {
                state: MonitorState::Stopped,
                worker: None,
                last_failure: None,
            })),
            detector: Arc::new(RwLock::new(detector)),
            counters: Arc::new(Counters::default()),
        })
    }

    /// Monitor reading from libpcap per `config.target`.
    #[cfg(feature = "capture")]
    pub fn with_pcap(config: MonitorConfig) -> Result<Self> {
        let opener = crate::sniff::PcapOpener::new(&config);
        Self::new(config, Box::new(opener))
    }

    /// Opens the frame source and launches the capture worker. Returns once
    /// the worker is running.
    pub fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != MonitorState::Stopped {
            return Err(MonitorError::AlreadyRunning);
        }
        lifecycle.state = MonitorState::Starting;

        // A worker that ended on a capture failure is already finished.
        if let Some(stale) = lifecycle.worker.take() {
            let _ = stale.handle.join();
        }

        let source = match self.opener.open() {
            Ok(source) => source,
            Err(e) => {
                error!(error = %e, "failed to open frame source");
                lifecycle.state = MonitorState::Stopped;
                lifecycle.last_failure = Some(e.to_string());
                return Err(e);
            }
        };
        let label = source.describe();

        // Trusted entries come first so they win over the interface's own address.
        let mut seeds = self.config.static_bindings.clone();
        if let Some(local) = source.local_binding() {
            info!(ip = %local.ip, mac = %local.mac, "pinning capturing host binding");
            seeds.push(local);
        }
        if !seeds.is_empty() {
            self.detector.write().seed(&seeds, Utc::now());
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let handle = {
            let cancel = cancel.clone();
            let detector = self.detector.clone();
            let lifecycle = self.lifecycle.clone();
            let counters = self.counters.clone();
            thread::Builder::new()
                .name("arp-capture".into())
                .spawn(move || run_capture(source, cancel, detector, lifecycle, counters))
                .map_err(|e| MonitorError::CaptureFailure(format!("spawn capture worker: {}", e)))
        };
        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                lifecycle.state = MonitorState::Stopped;
                lifecycle.last_failure = Some(e.to_string());
                return Err(e);
            }
        };

        lifecycle.worker = Some(Worker {
            cancel,
            handle,
            source: label.clone(),
        });
        lifecycle.last_failure = None;
        lifecycle.state = MonitorState::Running;
        info!(source = %label, "monitoring started");
        Ok(())
    }

    /// Stops the worker, waits for it to exit and clears alert flags.
    /// Known devices and the event log are kept.
    pub fn stop(&self) -> Result<()> {
        let worker = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.state != MonitorState::Running {
                return Err(MonitorError::NotRunning);
            }
            lifecycle.state = MonitorState::Stopping;
            lifecycle.worker.take()
        };

        if let Some(worker) = worker {
            worker.cancel.store(true, Ordering::SeqCst);
            if worker.handle.join().is_err() {
                error!(source = %worker.source, "capture worker panicked");
            }
        }

        self.detector.write().clear_alerts();
        self.lifecycle.lock().state = MonitorState::Stopped;
        info!("monitoring stopped");
        Ok(())
    }

    /// Forgets known devices and clears the event log. Only allowed while stopped.
    pub fn reset(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != MonitorState::Stopped {
            return Err(MonitorError::AlreadyRunning);
        }
        self.detector.write().reset_all();
        lifecycle.last_failure = None;
        self.counters.processed.store(0, Ordering::Relaxed);
        self.counters.malformed.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        info!("monitor reset");
        Ok(())
    }

    pub fn state(&self) -> MonitorState {
        self.lifecycle.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == MonitorState::Running
    }

    pub fn devices(&self) -> Vec<Device> {
        registry::snapshot(&self.detector.read())
    }

    pub fn events(&self, since: Option<u64>) -> Vec<SpoofEvent> {
        self.detector.read().log().list(since)
    }

    pub fn events_csv(&self) -> String {
        let events = self.events(None);
        render_csv(&events)
    }

    pub fn status(&self) -> MonitorStatus {
        let (state, source, last_failure) = {
            let lifecycle = self.lifecycle.lock();
            (
                lifecycle.state,
                lifecycle.worker.as_ref().map(|w| w.source.clone()),
                lifecycle.last_failure.clone(),
            )
        };
        let detector = self.detector.read();
        MonitorStatus {
            state,
            source,
            frames_processed: self.counters.processed.load(Ordering::Relaxed),
            malformed_frames: self.counters.malformed.load(Ordering::Relaxed),
            dropped_frames: self.counters.dropped.load(Ordering::Relaxed),
            devices: detector.bindings().len(),
            events_logged: detector.log().len(),
            events_evicted: detector.log().evicted(),
            detector: detector.stats(),
            last_failure,
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.is_running() {
            let _ = self.stop();
        }
    }
}

fn run_capture(
    mut source: Box<dyn FrameSource>,
    cancel: Arc<AtomicBool>,
    detector: Arc<RwLock<Detector>>,
    lifecycle: Arc<Mutex<Lifecycle>>,
    counters: Arc<Counters>,
) {
    let label = source.describe();
    debug!(source = %label, "capture worker running");

    while !cancel.load(Ordering::SeqCst) {
        let frame = match source.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(MonitorError::MalformedFrame(reason)) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(source = %label, %reason, "skipping malformed frame");
                continue;
            }
            Err(e) => {
                error!(source = %label, error = %e, "capture failed, stopping monitor");
                fail_session(&lifecycle, &detector, e.to_string());
                return;
            }
        };

        // One frame per write lock: a frame is either fully committed or not at all.
        let result = detector.write().process(&frame);
        match result {
            Ok(_) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
            }
            Err(MonitorError::MalformedFrame(reason)) => {
                counters.malformed.fetch_add(1, Ordering::Relaxed);
                debug!(sender_ip = %frame.sender_ip, %reason, "skipping malformed frame");
            }
            Err(e) => {
                counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(sender_ip = %frame.sender_ip, error = %e, "frame dropped");
            }
        }
    }

    debug!(source = %label, "capture worker exiting");
}

/// Forces `Running -> Stopped` after a fatal source error. Leaves a concurrent
/// `stop()` to finish its own transition.
fn fail_session(lifecycle: &Mutex<Lifecycle>, detector: &RwLock<Detector>, reason: String) {
    let mut lifecycle = lifecycle.lock();
    lifecycle.last_failure = Some(reason);
    if lifecycle.state == MonitorState::Running {
        detector.write().clear_alerts();
        lifecycle.state = MonitorState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sniff::channel;
    use std::time::Duration;

    struct FailingOpener;

    impl SourceOpener for FailingOpener {
        fn open(&self) -> Result<Box<dyn FrameSource>> {
            Err(MonitorError::CaptureFailure("no such device".into()))
        }
    }

    fn channel_monitor() -> (crossbeam_channel::Sender<crate::models::domain::ArpFrame>, Monitor) {
        let (tx, opener) = channel(Duration::from_millis(10));
        let monitor = Monitor::new(MonitorConfig::default(), Box::new(opener)).unwrap();
        (tx, monitor)
    }

    #[test]
    fn test_lifecycle_misuse_is_reported() {
        let (_tx, monitor) = channel_monitor();
        assert_eq!(monitor.stop(), Err(MonitorError::NotRunning));

        monitor.start().unwrap();
        assert_eq!(monitor.state(), MonitorState::Running);
        assert_eq!(monitor.start(), Err(MonitorError::AlreadyRunning));
        assert_eq!(monitor.reset(), Err(MonitorError::AlreadyRunning));

        monitor.stop().unwrap();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(monitor.stop(), Err(MonitorError::NotRunning));
    }

    #[test]
    fn test_open_failure_leaves_monitor_stopped() {
        let monitor = Monitor::new(MonitorConfig::default(), Box::new(FailingOpener)).unwrap();
        assert!(matches!(monitor.start(), Err(MonitorError::CaptureFailure(_))));
        let status = monitor.status();
        assert_eq!(status.state, MonitorState::Stopped);
        assert!(status.last_failure.unwrap().contains("no such device"));
    }

    #[test]
    fn test_reads_before_start_are_empty() {
        let (_tx, monitor) = channel_monitor();
        assert!(monitor.devices().is_empty());
        assert!(monitor.events(None).is_empty());
        assert_eq!(monitor.events_csv(), "Victim IP,Old MAC,New MAC,Attacker IP,Timestamp\n");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let (_tx, opener) = channel(Duration::from_millis(10));
        let mut config = MonitorConfig::default();
        config.detection.log_capacity = Some(0);
        assert!(matches!(Monitor::new(config, Box::new(opener)), Err(MonitorError::Config(_))));
    }
}
