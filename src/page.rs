//! The record page controller.
//!
//! `RecordPage` owns a `ViewState` describing every widget on the page and
//! mutates it in response to user actions, recorder events and process
//! refreshes. Rendering only reads the state and calls back into the
//! handlers here, so everything except layout is testable without a window.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::PageConfig;
use crate::perf::{split_args, CallGraph};
use crate::process::{ProcessInfo, ProcessList};
use crate::recorder::{Recorder, RecorderEvent, RecordingParameters, RecordingTarget};
use crate::refresher::{ProcessRefresher, REFRESH_INTERVAL};
use crate::validation::{
    local_path, resolve_application, validate_application, validate_output_file,
    validate_working_directory, with_data_extension,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionMode {
    LaunchApplication,
    AttachToProcess,
}

impl SessionMode {
    pub fn label(&self) -> &'static str {
        match self {
            SessionMode::LaunchApplication => "Launch Application",
            SessionMode::AttachToProcess => "Attach To Process(es)",
        }
    }
}

/// Requests from the page to the window hosting it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HostEvent {
    OpenFile(PathBuf),
}

#[derive(Clone, Debug)]
pub struct ViewState {
    pub mode: SessionMode,
    pub application: String,
    pub arguments: String,
    pub working_directory: String,
    /// Shown, and used, while `working_directory` is empty.
    pub working_directory_placeholder: Option<String>,
    pub output_file: String,
    pub event_type: String,
    pub call_graph: CallGraph,
    pub call_graph_modes: Vec<CallGraph>,
    pub process_filter: String,
    pub processes: ProcessList,
    pub selected: BTreeSet<u32>,
    /// Checked state of the start/stop toggle.
    pub recording: bool,
    pub error: Option<String>,
    pub output_log: String,
    pub output_visible: bool,
    pub results_file: Option<PathBuf>,
    pub view_results_enabled: bool,
}

impl ViewState {
    pub fn new(config: &PageConfig, call_graph_modes: Vec<CallGraph>) -> Self {
        let call_graph = if call_graph_modes.contains(&config.call_graph) {
            config.call_graph
        } else {
            CallGraph::default()
        };

        Self {
            mode: if config.attach {
                SessionMode::AttachToProcess
            } else {
                SessionMode::LaunchApplication
            },
            application: String::new(),
            arguments: String::new(),
            working_directory: config.working_directory().display().to_string(),
            working_directory_placeholder: None,
            output_file: config.output_file().display().to_string(),
            event_type: config.event_type.clone().unwrap_or_default(),
            call_graph,
            call_graph_modes,
            process_filter: String::new(),
            processes: ProcessList::new(),
            selected: BTreeSet::new(),
            recording: false,
            error: None,
            output_log: String::new(),
            output_visible: false,
            results_file: None,
            view_results_enabled: false,
        }
    }

    pub fn launch_fields_visible(&self) -> bool {
        self.mode == SessionMode::LaunchApplication
    }

    pub fn attach_fields_visible(&self) -> bool {
        self.mode == SessionMode::AttachToProcess
    }

    /// Selected pids that are still running, in ascending order.
    pub fn selected_pids(&self) -> Vec<u32> {
        self.selected
            .iter()
            .copied()
            .filter(|pid| self.processes.is_live(*pid))
            .collect()
    }

    /// Stopping is always possible; starting in attach mode needs a selection.
    pub fn start_enabled(&self) -> bool {
        if self.recording {
            return true;
        }
        match self.mode {
            SessionMode::LaunchApplication => true,
            SessionMode::AttachToProcess => !self.selected_pids().is_empty(),
        }
    }

    pub fn start_button_text(&self) -> &'static str {
        if self.recording {
            "⏹ Stop Recording"
        } else {
            "⏺ Start Recording"
        }
    }

    fn effective_working_directory(&self) -> PathBuf {
        if self.working_directory.trim().is_empty() {
            if let Some(placeholder) = &self.working_directory_placeholder {
                return PathBuf::from(placeholder);
            }
        }
        local_path(&self.working_directory)
    }

    /// Options common to both modes, in the order perf expects them.
    pub fn perf_options(&self) -> Vec<String> {
        let mut options = Vec::new();
        if let Some(mode) = self.call_graph.option() {
            options.push("--call-graph".to_string());
            options.push(mode.to_string());
        }
        let event = self.event_type.trim();
        if !event.is_empty() {
            options.push("--event".to_string());
            options.push(event.to_string());
        }
        options
    }

    pub fn recording_parameters(&self) -> Result<RecordingParameters, String> {
        let target = match self.mode {
            SessionMode::LaunchApplication => RecordingTarget::Launch {
                application: resolve_application(&self.application),
                arguments: split_args(&self.arguments).map_err(|e| e.to_string())?,
                working_directory: self.effective_working_directory(),
            },
            SessionMode::AttachToProcess => RecordingTarget::Attach {
                pids: self.selected_pids(),
            },
        };

        Ok(RecordingParameters {
            perf_options: self.perf_options(),
            output_path: local_path(&self.output_file),
            target,
        })
    }
}

pub struct RecordPage<R: Recorder> {
    state: ViewState,
    recorder: R,
    recorder_events: Receiver<RecorderEvent>,
    host: Sender<HostEvent>,
    refresher: Option<ProcessRefresher>,
}

impl<R: Recorder> RecordPage<R> {
    pub fn new(
        state: ViewState,
        recorder: R,
        recorder_events: Receiver<RecorderEvent>,
        host: Sender<HostEvent>,
    ) -> Self {
        let mut page = Self {
            state,
            recorder,
            recorder_events,
            host,
            refresher: None,
        };
        page.reset_results();
        page
    }

    /// Attach the background process refresher and kick off the first cycle.
    pub fn with_refresher(mut self, mut refresher: ProcessRefresher) -> Self {
        refresher.refresh(self.state.processes.snapshot());
        self.refresher = Some(refresher);
        self
    }

    pub fn state(&self) -> &ViewState {
        &self.state
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    /// Drain recorder events and a finished process refresh, if any.
    pub fn poll(&mut self) {
        while let Ok(event) = self.recorder_events.try_recv() {
            self.on_recorder_event(event);
        }

        let refreshed = self.refresher.as_mut().and_then(|r| r.try_complete());
        if let Some(processes) = refreshed {
            self.on_refresh_complete(processes);
        }
    }

    fn reset_results(&mut self) {
        self.state.results_file = None;
        self.state.error = None;
        self.state.output_log.clear();
        self.state.output_visible = false;
        self.state.view_results_enabled = false;
    }

    pub fn on_session_mode_changed(&mut self, mode: SessionMode) {
        if self.state.mode == mode {
            return;
        }
        debug!("Session mode changed to {:?}", mode);
        self.state.mode = mode;
    }

    pub fn on_start_toggled(&mut self, checked: bool) {
        if checked {
            self.start_recording();
        } else {
            self.stop_recording();
        }
    }

    fn start_recording(&mut self) {
        if self.state.recording {
            return;
        }
        if !self.state.start_enabled() {
            warn!("Start requested with no process selected");
            return;
        }

        self.reset_results();

        let params = match self.state.recording_parameters() {
            Ok(params) => params,
            Err(message) => {
                self.state.error = Some(message);
                return;
            }
        };

        info!("Starting recording into {}", params.output_path.display());
        self.state.recording = true;
        self.recorder.record(&params);
    }

    fn stop_recording(&mut self) {
        if !self.state.recording {
            return;
        }
        info!("Stopping recording");
        self.state.recording = false;
        self.recorder.stop_recording();
    }

    pub fn on_recorder_event(&mut self, event: RecorderEvent) {
        match event {
            RecorderEvent::Finished(path) => {
                info!("Recording finished: {}", path.display());
                self.state.recording = false;
                self.state.error = None;
                self.state.results_file = Some(path);
                self.state.view_results_enabled = true;
            }
            RecorderEvent::Failed(message) => {
                warn!("Recording failed: {}", message);
                self.state.recording = false;
                self.state.error = Some(message);
                self.state.view_results_enabled = false;
            }
            RecorderEvent::Output(text) => {
                self.state.output_log.push_str(&text);
                self.state.output_visible = true;
            }
        }
    }

    pub fn on_view_results_clicked(&mut self) {
        let Some(path) = self.state.results_file.clone() else {
            return;
        };
        if path.as_os_str().is_empty() {
            return;
        }
        if self.host.send(HostEvent::OpenFile(path)).is_err() {
            warn!("Host window is gone, cannot open results");
        }
    }

    fn show_validation<T, E: ToString>(&mut self, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => {
                self.state.error = None;
                Some(value)
            }
            Err(e) => {
                self.state.error = Some(e.to_string());
                None
            }
        }
    }

    pub fn on_application_path_changed(&mut self, text: String) {
        self.state.application = text;
        let result = validate_application(&self.state.application);
        if let Some(application) = self.show_validation(result) {
            if self.state.working_directory.trim().is_empty() {
                self.state.working_directory_placeholder = application
                    .parent()
                    .map(|dir| dir.display().to_string());
            }
        }
    }

    pub fn on_working_directory_changed(&mut self, text: String) {
        self.state.working_directory = text;
        let result = validate_working_directory(&self.state.working_directory);
        self.show_validation(result);
    }

    pub fn on_output_path_changed(&mut self, text: String) {
        self.state.output_file = text;
        let result = validate_output_file(&self.state.output_file);
        self.show_validation(result);
    }

    /// Confirmed output path, from Enter or the file dialog.
    pub fn on_output_path_selected(&mut self, text: String) {
        let text = with_data_extension(&text);
        self.on_output_path_changed(text);
    }

    pub fn on_arguments_changed(&mut self, text: String) {
        self.state.arguments = text;
    }

    pub fn on_event_type_changed(&mut self, text: String) {
        self.state.event_type = text;
    }

    pub fn on_call_graph_changed(&mut self, mode: CallGraph) {
        if self.state.call_graph_modes.contains(&mode) {
            self.state.call_graph = mode;
        }
    }

    pub fn on_process_filter_changed(&mut self, text: String) {
        self.state.process_filter = text;
    }

    /// Toggle a row in the multi-selection. Exited rows can't be picked.
    pub fn on_process_clicked(&mut self, pid: u32) {
        if !self.state.selected.remove(&pid) && self.state.processes.is_live(pid) {
            self.state.selected.insert(pid);
        }
    }

    pub fn on_refresh_complete(&mut self, processes: Vec<ProcessInfo>) {
        self.state.processes.merge(processes);

        let processes = &self.state.processes;
        self.state.selected.retain(|pid| processes.is_live(*pid));

        if let Some(refresher) = self.refresher.as_mut() {
            refresher.schedule(self.state.processes.snapshot(), REFRESH_INTERVAL);
        }
    }
}

/// Directory a file dialog should open in for a given field value.
pub fn dialog_directory(text: &str) -> PathBuf {
    let path = local_path(text);
    if path.is_dir() {
        return path;
    }
    path.parent()
        .filter(|p| p.is_dir())
        .map(Path::to_path_buf)
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."))
}
