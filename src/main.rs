mod config;
mod error;
mod page;
mod perf;
mod process;
mod recorder;
mod refresher;
mod ui;
mod validation;

use std::sync::Arc;

use clap::Parser;
use eframe::egui;
use tracing::{info, warn};

use config::{Cli, PageConfig};
use page::{RecordPage, ViewState};
use perf::find_perf;
use process::SystemProcesses;
use recorder::{PerfRecorder, RepaintHook};
use refresher::ProcessRefresher;
use ui::{call_graph_modes, RecordApp};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();
    let config = PageConfig::from_cli(&cli)?;

    let perf_path = config.perf_path.clone().or_else(find_perf);
    match &perf_path {
        Some(path) => info!("Using perf at {}", path.display()),
        None => warn!("perf not found in PATH"),
    }

    let runtime = tokio::runtime::Runtime::new()?;
    let handle = runtime.handle().clone();

    let native_options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_title("perfrec - Record")
            .with_inner_size([760.0, 620.0]),
        ..Default::default()
    };

    let res = eframe::run_native(
        "perfrec",
        native_options,
        Box::new(move |cc| {
            let ctx = cc.egui_ctx.clone();
            let repaint: RepaintHook = Arc::new(move || ctx.request_repaint());

            let (recorder_tx, recorder_rx) = crossbeam_channel::unbounded();
            let (host_tx, host_rx) = crossbeam_channel::unbounded();

            let recorder = PerfRecorder::new(handle.clone(), perf_path.clone(), recorder_tx, repaint.clone());
            let refresher = ProcessRefresher::new(handle, Arc::new(SystemProcesses::new()), repaint);
            let state = ViewState::new(&config, call_graph_modes());
            let page = RecordPage::new(state, recorder, recorder_rx, host_tx).with_refresher(refresher);

            Ok(Box::new(RecordApp::new(page, host_rx, config.viewer.clone(), perf_path.is_none())))
        }),
    );

    drop(runtime);
    match res {
        Ok(_) => Ok(()),
        Err(e) => Err(anyhow::anyhow!("eframe error: {}", e)),
    }
}
