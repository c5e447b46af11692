use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::perf::PerfCommandBuilder;
use crate::process::process_exists;
use crate::validation::is_executable;

/// Wakes the UI loop when something arrived on a channel.
pub type RepaintHook = Arc<dyn Fn() + Send + Sync>;

/// How long perf gets to flush after SIGINT before it is killed.
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// What to record: a freshly launched application or running processes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordingTarget {
    Launch {
        application: PathBuf,
        arguments: Vec<String>,
        working_directory: PathBuf,
    },
    Attach {
        pids: Vec<u32>,
    },
}

/// Everything one `perf record` run needs. Built fresh on every start.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordingParameters {
    pub perf_options: Vec<String>,
    pub output_path: PathBuf,
    pub target: RecordingTarget,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecorderEvent {
    Output(String),
    Finished(PathBuf),
    Failed(String),
}

pub trait Recorder {
    fn record(&mut self, params: &RecordingParameters);
    fn stop_recording(&mut self);
}

#[derive(Default)]
struct Session {
    pid: Option<u32>,
    active: bool,
    stop_requested: bool,
}

/// Drives `perf record` as a child process on the tokio runtime.
pub struct PerfRecorder {
    runtime: Handle,
    perf_path: Option<PathBuf>,
    events: Sender<RecorderEvent>,
    repaint: RepaintHook,
    session: Arc<Mutex<Session>>,
}

impl PerfRecorder {
    pub fn new(
        runtime: Handle,
        perf_path: Option<PathBuf>,
        events: Sender<RecorderEvent>,
        repaint: RepaintHook,
    ) -> Self {
        Self {
            runtime,
            perf_path,
            events,
            repaint,
            session: Arc::new(Mutex::new(Session::default())),
        }
    }

    pub fn is_recording(&self) -> bool {
        self.session.lock().active
    }

    fn fail(&self, message: String) {
        warn!("Recording rejected: {}", message);
        let _ = self.events.send(RecorderEvent::Failed(message));
        (self.repaint)();
    }

    fn preflight(&self, params: &RecordingParameters) -> Result<PathBuf, String> {
        let perf = self
            .perf_path
            .clone()
            .ok_or_else(|| "perf executable not found. Install perf or pass --perf".to_string())?;

        match &params.target {
            RecordingTarget::Launch { application, working_directory, .. } => {
                if !application.is_file() {
                    return Err(format!(
                        "Application file cannot be found: {}",
                        application.display()
                    ));
                }
                if !is_executable(application) {
                    return Err(format!(
                        "Application file is not executable: {}",
                        application.display()
                    ));
                }
                if !working_directory.is_dir() {
                    return Err(format!(
                        "Working directory folder cannot be found: {}",
                        working_directory.display()
                    ));
                }
            }
            RecordingTarget::Attach { pids } => {
                if pids.is_empty() {
                    return Err("Process does not exist.".to_string());
                }
                if let Some(pid) = pids.iter().find(|pid| !process_exists(**pid)) {
                    return Err(format!("Process does not exist: {}", pid));
                }
            }
        }
        Ok(perf)
    }
}

impl Recorder for PerfRecorder {
    fn record(&mut self, params: &RecordingParameters) {
        let perf = match self.preflight(params) {
            Ok(perf) => perf,
            Err(message) => return self.fail(message),
        };

        {
            let mut session = self.session.lock();
            if session.active {
                drop(session);
                return self.fail("A recording is already in progress".to_string());
            }
            *session = Session { pid: None, active: true, stop_requested: false };
        }

        let params = params.clone();
        let events = self.events.clone();
        let repaint = self.repaint.clone();
        let session = self.session.clone();

        self.runtime.spawn(async move {
            let event = run_perf(&perf, &params, &events, &repaint, &session).await;
            *session.lock() = Session::default();
            let _ = events.send(event);
            repaint();
        });
    }

    fn stop_recording(&mut self) {
        let pid = {
            let mut session = self.session.lock();
            if !session.active {
                debug!("Stop requested with no recording running");
                return;
            }
            session.stop_requested = true;
            session.pid
        };

        let Some(pid) = pid else {
            debug!("Stop requested before perf was spawned");
            return;
        };

        info!("Stopping perf (pid {})", pid);
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
            error!("Failed to send SIGINT to perf: {}", e);
        }

        let session = self.session.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(STOP_GRACE_PERIOD).await;
            let still_running = {
                let session = session.lock();
                session.active && session.pid == Some(pid)
            };
            if still_running {
                info!("perf didn't exit within {:?}, force killing process", STOP_GRACE_PERIOD);
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            }
        });
    }
}

async fn run_perf(
    perf: &Path,
    params: &RecordingParameters,
    events: &Sender<RecorderEvent>,
    repaint: &RepaintHook,
    session: &Arc<Mutex<Session>>,
) -> RecorderEvent {
    let mut cmd = PerfCommandBuilder::new(perf, params).build();
    info!("Executing perf command: {:?}", cmd);

    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn perf: {}", e);
            return RecorderEvent::Failed(format!("Failed to start perf: {}", e));
        }
    };

    let stop_early = {
        let mut session = session.lock();
        session.pid = child.id();
        session.stop_requested
    };
    if stop_early {
        if let Some(pid) = child.id() {
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
        }
    }

    let stdout = child.stdout.take().map(|out| forward_output(out, events.clone(), repaint.clone()));
    let stderr = child.stderr.take().map(|err| forward_output(err, events.clone(), repaint.clone()));

    let status = child.wait().await;

    for reader in [stdout, stderr].into_iter().flatten() {
        let _ = reader.await;
    }

    let stopped = session.lock().stop_requested;
    match status {
        Ok(status) => finish(status, stopped, params),
        Err(e) => {
            error!("Error waiting for perf: {}", e);
            RecorderEvent::Failed(format!("Failed to record perf data: {}", e))
        }
    }
}

fn finish(status: ExitStatus, stopped: bool, params: &RecordingParameters) -> RecorderEvent {
    info!("perf exited with status: {:?}", status);
    if status.success() || (stopped && params.output_path.exists()) {
        RecorderEvent::Finished(params.output_path.clone())
    } else {
        let code = status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        RecorderEvent::Failed(format!("Failed to record perf data, error code {}", code))
    }
}

fn forward_output<R>(
    stream: R,
    events: Sender<RecorderEvent>,
    repaint: RepaintHook,
) -> tokio::task::JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    debug!("perf: {}", line);
                    let _ = events.send(RecorderEvent::Output(format!("{}\n", line)));
                    repaint();
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed reading perf output: {}", e);
                    break;
                }
            }
        }
    })
}
