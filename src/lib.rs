pub mod cache;
pub mod commands;
pub mod config;
pub mod error;
pub mod export;
pub mod highlight;
pub mod image_loader;
pub mod models;
pub mod review;
pub mod services;
pub mod tables;
pub mod types;
pub mod viewport;

pub use error::{Result, ReviewError};
pub use review::{ReviewFrame, ReviewSession};

use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber (`RUST_LOG`, default `info`). Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[cfg(feature = "desktop")]
#[cfg_attr(mobile, tauri::mobile_entry_point)]
pub fn run() {
    use commands::{desktop, AppState};
    use tauri::Manager;

    init_tracing();
    config::load_env();

    tauri::Builder::default()
        .plugin(tauri_plugin_dialog::init())
        .plugin(tauri_plugin_opener::init())
        .setup(|app| {
            let app_data_dir = app.path().app_data_dir().map_err(|e| e.to_string())?;
            // Optional `.env` with credentials in the app data folder.
            config::load_env_file(&app_data_dir.join(".env"));
            let config = config::ReviewConfig::from_env();
            tracing::info!(api = %config.api_base_url, status = config.status(), "review window starting");
            app.manage(AppState::new(config));
            Ok(())
        })
        .invoke_handler(tauri::generate_handler![
            desktop::config_status,
            desktop::load_document,
            desktop::recompute_frame,
            desktop::select_field,
            desktop::hover_field,
            desktop::pointer_move,
            desktop::pointer_leave,
            desktop::set_container_width,
            desktop::zoom_in,
            desktop::zoom_out,
            desktop::zoom_reset,
            desktop::zoom_wheel,
            desktop::correct_field,
            desktop::mark_reviewed,
            desktop::request_image,
            desktop::release_image,
            desktop::image_data_url,
            desktop::field_tables,
            desktop::export_run,
            desktop::open_export_folder,
        ])
        .run(tauri::generate_context!())
        .expect("error while running tauri application");
}
