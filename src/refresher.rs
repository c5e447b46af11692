//! Background process list refresh.
//!
//! Each cycle runs one enumeration on a blocking worker and hands the result
//! back through a channel that the UI thread polls. The next cycle is only
//! scheduled once the caller has merged the previous result, so cycles never
//! overlap.

use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::process::{ProcessEnumerator, ProcessInfo};
use crate::recorder::RepaintHook;

pub const REFRESH_INTERVAL: Duration = Duration::from_millis(1000);

pub struct ProcessRefresher {
    runtime: Handle,
    enumerator: Arc<dyn ProcessEnumerator>,
    results_tx: Sender<Vec<ProcessInfo>>,
    results_rx: Receiver<Vec<ProcessInfo>>,
    repaint: RepaintHook,
    pending: Option<JoinHandle<()>>,
}

impl ProcessRefresher {
    pub fn new(runtime: Handle, enumerator: Arc<dyn ProcessEnumerator>, repaint: RepaintHook) -> Self {
        let (results_tx, results_rx) = unbounded();
        Self {
            runtime,
            enumerator,
            results_tx,
            results_rx,
            repaint,
            pending: None,
        }
    }

    /// Start a cycle right away.
    pub fn refresh(&mut self, known: Vec<ProcessInfo>) {
        self.schedule(known, Duration::ZERO);
    }

    /// Start a cycle after `delay`. Ignored while another cycle is pending.
    pub fn schedule(&mut self, known: Vec<ProcessInfo>, delay: Duration) {
        if self.is_pending() {
            debug!("Process refresh already pending, not scheduling another");
            return;
        }

        let enumerator = self.enumerator.clone();
        let tx = self.results_tx.clone();
        let repaint = self.repaint.clone();

        self.pending = Some(self.runtime.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let processes = match tokio::task::spawn_blocking(move || enumerator.enumerate(&known)).await {
                Ok(processes) => processes,
                Err(e) => {
                    warn!("Process enumeration failed: {}", e);
                    Vec::new()
                }
            };
            if tx.send(processes).is_ok() {
                repaint();
            }
        }));
    }

    /// The finished cycle's result, if one is ready.
    pub fn try_complete(&mut self) -> Option<Vec<ProcessInfo>> {
        let processes = self.results_rx.try_recv().ok()?;
        self.pending = None;
        Some(processes)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        if let Some(task) = self.pending.take() {
            task.abort();
            debug!("Cancelled pending process refresh");
        }
        while self.results_rx.try_recv().is_ok() {}
    }
}

impl Drop for ProcessRefresher {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    struct CountingEnumerator {
        calls: AtomicUsize,
    }

    impl ProcessEnumerator for CountingEnumerator {
        fn enumerate(&self, previous: &[ProcessInfo]) -> Vec<ProcessInfo> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as u32;
            let mut result = previous.to_vec();
            result.push(ProcessInfo {
                pid: 100 + n,
                name: format!("proc{}", n),
                user: "root".to_string(),
                state: "Run".to_string(),
            });
            result
        }
    }

    fn refresher(runtime: &tokio::runtime::Runtime) -> (ProcessRefresher, Arc<CountingEnumerator>) {
        let enumerator = Arc::new(CountingEnumerator { calls: AtomicUsize::new(0) });
        let refresher = ProcessRefresher::new(runtime.handle().clone(), enumerator.clone(), Arc::new(|| {}));
        (refresher, enumerator)
    }

    fn wait_for(refresher: &mut ProcessRefresher, timeout: Duration) -> Option<Vec<ProcessInfo>> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if let Some(result) = refresher.try_complete() {
                return Some(result);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        None
    }

    #[test]
    fn refresh_delivers_enumeration_with_hint() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (mut refresher, _) = refresher(&runtime);

        refresher.refresh(vec![]);
        assert!(refresher.is_pending());
        let first = wait_for(&mut refresher, Duration::from_secs(5)).unwrap();
        assert_eq!(first.len(), 1);
        assert!(!refresher.is_pending());

        refresher.refresh(first);
        let second = wait_for(&mut refresher, Duration::from_secs(5)).unwrap();
        assert_eq!(second.iter().map(|p| p.pid).collect::<Vec<_>>(), vec![100, 101]);
    }

    #[test]
    fn cycles_do_not_overlap() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (mut refresher, enumerator) = refresher(&runtime);

        refresher.schedule(vec![], Duration::from_millis(50));
        refresher.schedule(vec![], Duration::ZERO);
        refresher.refresh(vec![]);

        assert!(wait_for(&mut refresher, Duration::from_secs(5)).is_some());
        assert!(wait_for(&mut refresher, Duration::from_millis(200)).is_none());
        assert_eq!(enumerator.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_stops_a_scheduled_cycle() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (mut refresher, enumerator) = refresher(&runtime);

        refresher.schedule(vec![], Duration::from_millis(100));
        refresher.cancel();
        assert!(!refresher.is_pending());

        std::thread::sleep(Duration::from_millis(300));
        assert!(refresher.try_complete().is_none());
        assert_eq!(enumerator.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn scheduled_cycle_waits_for_delay() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (mut refresher, _) = refresher(&runtime);

        let start = Instant::now();
        refresher.schedule(vec![], Duration::from_millis(150));
        assert!(wait_for(&mut refresher, Duration::from_secs(5)).is_some());
        assert!(start.elapsed() >= Duration::from_millis(150));
    }
}
