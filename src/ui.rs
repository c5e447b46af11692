use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use std::thread::JoinHandle;

use anyhow::{anyhow, Context};
use crossbeam_channel::Receiver;
use eframe::egui;
use egui_extras::{Column, TableBuilder};
use tracing::{debug, error, info, warn};

use crate::page::{dialog_directory, HostEvent, RecordPage, SessionMode};
use crate::perf::{split_args, CallGraph};
use crate::recorder::PerfRecorder;

/// Main window hosting the record page.
pub struct RecordApp {
    page: RecordPage<PerfRecorder>,
    host_events: Receiver<HostEvent>,
    viewer: Option<String>,
    perf_missing: bool,
    status: String,
}

impl RecordApp {
    pub fn new(
        page: RecordPage<PerfRecorder>,
        host_events: Receiver<HostEvent>,
        viewer: Option<String>,
        perf_missing: bool,
    ) -> Self {
        Self {
            page,
            host_events,
            viewer,
            perf_missing,
            status: String::new(),
        }
    }

    fn open_file(&mut self, path: PathBuf) {
        let Some(viewer) = self.viewer.clone() else {
            self.status = format!("Recording saved to {}", path.display());
            return;
        };
        match launch_viewer(&viewer, &path) {
            Ok(_) => {
                info!("Opened {} with {}", path.display(), viewer);
                self.status = format!("Opened {} in {}", path.display(), viewer);
            }
            Err(e) => {
                error!("Failed to launch viewer {}: {}", viewer, e);
                self.status = format!("Failed to launch {}: {}", viewer, e);
            }
        }
    }

    fn render_mode(&mut self, ui: &mut egui::Ui) {
        let mut mode = self.page.state().mode;
        egui::ComboBox::from_id_salt("record_type")
            .selected_text(mode.label())
            .show_ui(ui, |ui| {
                for option in [SessionMode::LaunchApplication, SessionMode::AttachToProcess] {
                    ui.selectable_value(&mut mode, option, option.label());
                }
            });
        if mode != self.page.state().mode {
            self.page.on_session_mode_changed(mode);
        }
    }

    fn render_launch_fields(&mut self, ui: &mut egui::Ui) {
        let state = self.page.state();
        let mut application = state.application.clone();
        let mut arguments = state.arguments.clone();
        let mut working_directory = state.working_directory.clone();
        let placeholder = state.working_directory_placeholder.clone().unwrap_or_default();

        egui::Grid::new("launch_fields").num_columns(3).show(ui, |ui| {
            ui.label("Application:");
            let response = ui.add_sized(
                egui::vec2(360.0, 20.0),
                egui::TextEdit::singleline(&mut application).hint_text("path or name in PATH"),
            );
            if response.changed() {
                self.page.on_application_path_changed(application.clone());
            }
            if ui.small_button("📁").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .set_directory(dialog_directory(&application))
                    .pick_file()
                {
                    self.page.on_application_path_changed(path.display().to_string());
                }
            }
            ui.end_row();

            ui.label("Parameters:");
            if ui
                .add_sized(egui::vec2(360.0, 20.0), egui::TextEdit::singleline(&mut arguments))
                .changed()
            {
                self.page.on_arguments_changed(arguments.clone());
            }
            ui.end_row();

            ui.label("Working directory:");
            let response = ui.add_sized(
                egui::vec2(360.0, 20.0),
                egui::TextEdit::singleline(&mut working_directory).hint_text(placeholder),
            );
            if response.changed() {
                self.page.on_working_directory_changed(working_directory.clone());
            }
            if ui.small_button("📁").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .set_directory(dialog_directory(&working_directory))
                    .pick_folder()
                {
                    self.page.on_working_directory_changed(path.display().to_string());
                }
            }
            ui.end_row();
        });
    }

    fn render_attach_fields(&mut self, ui: &mut egui::Ui) {
        let mut filter = self.page.state().process_filter.clone();
        ui.horizontal(|ui| {
            ui.label("Filter:");
            if ui
                .add(egui::TextEdit::singleline(&mut filter).hint_text("name, user or pid"))
                .changed()
            {
                self.page.on_process_filter_changed(filter.clone());
            }
            let processes = &self.page.state().processes;
            ui.label(
                egui::RichText::new(format!("{} processes", processes.len()))
                    .small()
                    .color(ui.style().visuals.weak_text_color()),
            );
        });

        if self.page.state().processes.is_empty() {
            ui.label("No processes found yet.");
            return;
        }

        let state = self.page.state();
        let rows: Vec<_> = state
            .processes
            .filtered(&state.process_filter)
            .into_iter()
            .map(|entry| (entry.clone(), state.selected.contains(&entry.info.pid)))
            .collect();

        let mut clicked = None;
        let row_height = 18.0;
        TableBuilder::new(ui)
            .striped(true)
            .resizable(true)
            .sense(egui::Sense::click())
            .max_scroll_height(260.0)
            .cell_layout(egui::Layout::left_to_right(egui::Align::Center))
            .column(Column::remainder().at_least(200.0))
            .column(Column::auto().at_least(70.0))
            .column(Column::auto().at_least(100.0))
            .header(row_height, |mut header| {
                for title in ["Name", "PID", "User"] {
                    header.col(|ui| {
                        ui.label(egui::RichText::new(title).strong());
                    });
                }
            })
            .body(|body| {
                body.rows(row_height, rows.len(), |mut row| {
                    let (entry, selected) = &rows[row.index()];
                    row.set_selected(*selected);
                    let weak = |ui: &egui::Ui, text: String| {
                        if entry.exited {
                            egui::RichText::new(text).color(ui.visuals().weak_text_color())
                        } else {
                            egui::RichText::new(text)
                        }
                    };
                    row.col(|ui| {
                        ui.label(weak(ui, entry.info.name.clone()))
                            .on_hover_text(entry.info.state.as_str());
                    });
                    row.col(|ui| {
                        ui.label(weak(ui, entry.info.pid.to_string()));
                    });
                    row.col(|ui| {
                        ui.label(weak(ui, entry.info.user.clone()));
                    });
                    if row.response().clicked() {
                        clicked = Some(entry.info.pid);
                    }
                });
            });

        if let Some(pid) = clicked {
            self.page.on_process_clicked(pid);
        }
    }

    fn render_common_fields(&mut self, ui: &mut egui::Ui) {
        let state = self.page.state();
        let mut output = state.output_file.clone();
        let mut event_type = state.event_type.clone();
        let mut call_graph = state.call_graph;
        let modes = state.call_graph_modes.clone();

        egui::Grid::new("perf_options").num_columns(3).show(ui, |ui| {
            ui.label("Output file:");
            let response = ui.add_sized(egui::vec2(360.0, 20.0), egui::TextEdit::singleline(&mut output));
            if response.changed() {
                self.page.on_output_path_changed(output.clone());
            }
            if response.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter)) {
                self.page.on_output_path_selected(output.clone());
            }
            if ui.small_button("📁").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .set_directory(dialog_directory(&output))
                    .set_file_name("perf.data")
                    .save_file()
                {
                    self.page.on_output_path_selected(path.display().to_string());
                }
            }
            ui.end_row();

            ui.label("Call graph:");
            egui::ComboBox::from_id_salt("call_graph")
                .selected_text(call_graph.label())
                .show_ui(ui, |ui| {
                    for mode in &modes {
                        ui.selectable_value(&mut call_graph, *mode, mode.label());
                    }
                });
            ui.end_row();

            ui.label("Event type:");
            if ui
                .add_sized(
                    egui::vec2(360.0, 20.0),
                    egui::TextEdit::singleline(&mut event_type).hint_text("default (cycles)"),
                )
                .changed()
            {
                self.page.on_event_type_changed(event_type.clone());
            }
            ui.end_row();
        });

        if call_graph != self.page.state().call_graph {
            self.page.on_call_graph_changed(call_graph);
        }
    }

    fn render_actions(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let state = self.page.state();
            let recording = state.recording;
            let toggle = egui::Button::new(state.start_button_text()).selected(recording);
            if ui.add_enabled(state.start_enabled(), toggle).clicked() {
                self.page.on_start_toggled(!recording);
            }

            let can_view = self.page.state().view_results_enabled;
            if ui
                .add_enabled(can_view, egui::Button::new("📊 View Results"))
                .clicked()
            {
                self.page.on_view_results_clicked();
            }

            if recording || self.page.recorder().is_recording() {
                ui.spinner();
            }
        });
    }
}

impl eframe::App for RecordApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.page.poll();
        while let Ok(event) = self.host_events.try_recv() {
            match event {
                HostEvent::OpenFile(path) => self.open_file(path),
            }
        }

        if self.page.state().recording {
            ctx.request_repaint_after(std::time::Duration::from_millis(250));
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Record");
                if self.perf_missing {
                    ui.colored_label(egui::Color32::RED, "⚠ perf not found");
                }
            });
            ui.separator();

            ui.horizontal(|ui| {
                ui.label("Record type:");
                self.render_mode(ui);
            });
            ui.add_space(6.0);

            if self.page.state().launch_fields_visible() {
                self.render_launch_fields(ui);
            }
            if self.page.state().attach_fields_visible() {
                self.render_attach_fields(ui);
            }

            ui.separator();
            self.render_common_fields(ui);
            ui.add_space(6.0);

            if let Some(message) = &self.page.state().error {
                egui::Frame::none()
                    .fill(egui::Color32::from_rgb(80, 20, 20))
                    .inner_margin(6.0)
                    .rounding(4.0)
                    .show(ui, |ui| {
                        ui.colored_label(egui::Color32::LIGHT_RED, message);
                    });
                ui.add_space(6.0);
            }

            self.render_actions(ui);

            if self.page.state().output_visible {
                ui.separator();
                ui.label("Record output:");
                egui::ScrollArea::vertical()
                    .stick_to_bottom(true)
                    .show(ui, |ui| {
                        let mut log = self.page.state().output_log.as_str();
                        ui.add(
                            egui::TextEdit::multiline(&mut log)
                                .font(egui::TextStyle::Monospace)
                                .desired_width(f32::INFINITY),
                        );
                    });
            }
        });

        egui::TopBottomPanel::bottom("footer").show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label(egui::RichText::new(&self.status).small());
            });
        });
    }
}

/// Call-graph modes this machine supports.
pub fn call_graph_modes() -> Vec<CallGraph> {
    CallGraph::available(crate::perf::is_intel_cpu())
}

/// Spawn `viewer` (a shell-style command line) with `path` appended and reap
/// it on a detached thread once it exits.
pub fn launch_viewer(viewer: &str, path: &Path) -> anyhow::Result<JoinHandle<Option<ExitStatus>>> {
    let mut words = split_args(viewer)?.into_iter();
    let program = words.next().ok_or_else(|| anyhow!("viewer command is empty"))?;

    let mut child = Command::new(&program)
        .args(words)
        .arg(path)
        .spawn()
        .with_context(|| format!("cannot start {}", program))?;

    let reaper = std::thread::Builder::new()
        .name("viewer-reaper".to_string())
        .spawn(move || match child.wait() {
            Ok(status) => {
                debug!("Viewer exited with {}", status);
                Some(status)
            }
            Err(e) => {
                warn!("Failed to wait for viewer: {}", e);
                None
            }
        })?;
    Ok(reaper)
}
