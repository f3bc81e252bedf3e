//! Command surface of the review window.
//!
//! Every command is a plain function over `&AppState` returning
//! `Result<_, String>`. The `desktop` module wraps them as Tauri commands and
//! moves network work onto the blocking pool.

use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

use crate::config::ReviewConfig;
use crate::export::{self, ExportFormat};
use crate::image_loader::{load_image, FetchTicket, HttpImageFetcher, ImageFetcher, ImageReference, LoadOutcome};
use crate::models::{FieldSelection, HoverTarget};
use crate::review::{ReviewFrame, ReviewSession};
use crate::services::api_client::ApiClient;
use crate::tables::{group_tables, FieldLayout};
use crate::types::{ProcessingRun, ReviewDocument};

pub struct AppState {
    pub session: Mutex<ReviewSession>,
    pub config: ReviewConfig,
}

impl AppState {
    pub fn new(config: ReviewConfig) -> Self {
        Self {
            session: Mutex::new(ReviewSession::new(config.overlay)),
            config,
        }
    }

    fn session(&self) -> Result<MutexGuard<'_, ReviewSession>, String> {
        self.session.lock().map_err(|e| e.to_string())
    }

    fn frame(&self) -> Result<ReviewFrame, String> {
        Ok(self.session()?.recompute())
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportResult {
    pub path: String,
    pub documents: usize,
}

pub fn config_status(state: &AppState) -> String {
    state.config.status().to_string()
}

pub fn fetch_document(config: &ReviewConfig, document_id: &str) -> Result<ReviewDocument, String> {
    let api = ApiClient::new(config).map_err(|e| e.to_string())?;
    api.fetch_document(document_id).map_err(|e| e.to_string())
}

/// Put an already fetched document on screen.
pub fn show_document(state: &AppState, doc: ReviewDocument) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.load_document(doc);
    Ok(session.recompute())
}

pub fn load_document(state: &AppState, document_id: &str) -> Result<ReviewFrame, String> {
    let doc = fetch_document(&state.config, document_id)?;
    show_document(state, doc)
}

pub fn recompute_frame(state: &AppState) -> Result<ReviewFrame, String> {
    state.frame()
}

pub fn select_field(state: &AppState, selection: FieldSelection) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.select(selection);
    Ok(session.recompute())
}

pub fn hover_field(state: &AppState, hover: HoverTarget) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.set_hover(hover);
    Ok(session.recompute())
}

/// `None` when nothing changed and no redraw is needed.
pub fn pointer_move(state: &AppState, x: f64, y: f64) -> Result<Option<ReviewFrame>, String> {
    let mut session = state.session()?;
    Ok(session.pointer_move(x, y).then(|| session.recompute()))
}

pub fn pointer_leave(state: &AppState) -> Result<Option<ReviewFrame>, String> {
    let mut session = state.session()?;
    Ok(session.pointer_leave().then(|| session.recompute()))
}

pub fn set_container_width(state: &AppState, width: f64) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.set_container_width(width);
    Ok(session.recompute())
}

pub fn zoom_in(state: &AppState) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.zoom_in();
    Ok(session.recompute())
}

pub fn zoom_out(state: &AppState) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.zoom_out();
    Ok(session.recompute())
}

pub fn zoom_reset(state: &AppState) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.zoom_reset();
    Ok(session.recompute())
}

pub fn zoom_wheel(state: &AppState, delta_y: f64, modifier: bool) -> Result<Option<ReviewFrame>, String> {
    let mut session = state.session()?;
    Ok(session.zoom_wheel(delta_y, modifier).then(|| session.recompute()))
}

fn current_document_id(state: &AppState) -> Result<String, String> {
    state
        .session()?
        .document()
        .map(|d| d.id.clone())
        .ok_or_else(|| crate::error::ReviewError::NoDocument.to_string())
}

/// Save a correction on the backend and show the document it returns.
pub fn correct_field(state: &AppState, field_index: usize, value: &str) -> Result<ReviewFrame, String> {
    let document_id = current_document_id(state)?;
    {
        // Fail fast on a bad index before touching the network.
        let session = state.session()?;
        crate::review::correct_field(session.fields(), field_index, value).map_err(|e| e.to_string())?;
    }
    let api = ApiClient::new(&state.config).map_err(|e| e.to_string())?;
    let doc = api
        .update_field(&document_id, field_index, value)
        .map_err(|e| e.to_string())?;
    show_document(state, doc)
}

pub fn mark_reviewed(state: &AppState) -> Result<ReviewFrame, String> {
    let document_id = current_document_id(state)?;
    let api = ApiClient::new(&state.config).map_err(|e| e.to_string())?;
    let doc = api.mark_reviewed(&document_id).map_err(|e| e.to_string())?;
    show_document(state, doc)
}

/// Reference for the loaded document's image when the caller does not pass one.
fn image_reference_for(state: &AppState, reference: Option<ImageReference>) -> Result<ImageReference, String> {
    if let Some(reference) = reference {
        return Ok(reference);
    }
    let session = state.session()?;
    let doc = session
        .document()
        .ok_or_else(|| crate::error::ReviewError::NoDocument.to_string())?;
    let api = ApiClient::new(&state.config).map_err(|e| e.to_string())?;
    Ok(api.image_reference(doc))
}

/// First half of an image load: `None` when the image is already current.
pub fn start_image(state: &AppState, reference: Option<ImageReference>) -> Result<Option<FetchTicket>, String> {
    let reference = image_reference_for(state, reference)?;
    Ok(state.session()?.request_image(reference))
}

/// Second half: a stale ticket is ignored and the frame reflects the newer request.
pub fn finish_image(state: &AppState, ticket: &FetchTicket, outcome: LoadOutcome) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.resolve_image(ticket, outcome);
    Ok(session.recompute())
}

/// Blocking fetch for a ticket with the configured token.
pub fn fetch_image(config: &ReviewConfig, ticket: &FetchTicket) -> LoadOutcome {
    match HttpImageFetcher::new(config.http_timeout) {
        Ok(fetcher) => load_image(&fetcher, ticket.reference(), config.api_token.as_deref()),
        Err(e) => LoadOutcome::Failed(e.to_string()),
    }
}

/// Synchronous image load through `fetcher`.
pub fn request_image(
    state: &AppState,
    fetcher: &dyn ImageFetcher,
    reference: Option<ImageReference>,
) -> Result<ReviewFrame, String> {
    let Some(ticket) = start_image(state, reference)? else {
        return state.frame();
    };
    let outcome = load_image(fetcher, ticket.reference(), state.config.api_token.as_deref());
    finish_image(state, &ticket, outcome)
}

pub fn release_image(state: &AppState) -> Result<ReviewFrame, String> {
    let mut session = state.session()?;
    session.release_image();
    Ok(session.recompute())
}

pub fn image_data_url(state: &AppState) -> Result<Option<String>, String> {
    Ok(state.session()?.image_data_url())
}

pub fn field_tables(state: &AppState) -> Result<FieldLayout, String> {
    Ok(group_tables(state.session()?.fields()))
}

/// Write a run's documents to `path`, or to a timestamped file in the export folder.
pub fn export_run_documents(
    config: &ReviewConfig,
    run: &ProcessingRun,
    export_keys: &HashMap<String, String>,
    format: ExportFormat,
    path: Option<String>,
) -> Result<ExportResult, String> {
    let name = run.document_type_name.clone().unwrap_or_else(|| "export".to_string());
    let path: PathBuf = match path.filter(|p| !p.trim().is_empty()) {
        Some(p) => export::with_extension(&p, format),
        None => {
            let dir = config
                .resolve_export_dir()
                .ok_or_else(|| "Could not find Downloads or Desktop folder".to_string())?;
            export::default_export_path(&dir, &name, format)
        }
    };
    export::export_documents(&run.documents, export_keys, &name, format, &path).map_err(|e| e.to_string())?;
    Ok(ExportResult {
        path: path.to_string_lossy().to_string(),
        documents: run.documents.len(),
    })
}

pub fn export_run(
    config: &ReviewConfig,
    run_id: &str,
    export_keys: &HashMap<String, String>,
    format: ExportFormat,
    path: Option<String>,
) -> Result<ExportResult, String> {
    let api = ApiClient::new(config).map_err(|e| e.to_string())?;
    let run = api.fetch_run(run_id).map_err(|e| e.to_string())?;
    export_run_documents(config, &run, export_keys, format, path)
}

pub fn open_export_folder(state: &AppState) -> Result<(), String> {
    let dir = state
        .config
        .resolve_export_dir()
        .ok_or_else(|| "Could not find Downloads or Desktop folder".to_string())?;
    opener::open(&dir).map_err(|e| e.to_string())
}

#[cfg(feature = "desktop")]
pub mod desktop {
    use super::*;
    use tauri::State;

    #[tauri::command]
    pub fn config_status(state: State<'_, AppState>) -> String {
        super::config_status(&state)
    }

    #[tauri::command]
    pub async fn load_document(state: State<'_, AppState>, document_id: String) -> Result<ReviewFrame, String> {
        let config = state.config.clone();
        let doc = tauri::async_runtime::spawn_blocking(move || super::fetch_document(&config, &document_id))
            .await
            .map_err(|e| e.to_string())??;
        super::show_document(&state, doc)
    }

    #[tauri::command]
    pub fn recompute_frame(state: State<'_, AppState>) -> Result<ReviewFrame, String> {
        super::recompute_frame(&state)
    }

    #[tauri::command]
    pub fn select_field(state: State<'_, AppState>, selection: FieldSelection) -> Result<ReviewFrame, String> {
        super::select_field(&state, selection)
    }

    #[tauri::command]
    pub fn hover_field(state: State<'_, AppState>, hover: HoverTarget) -> Result<ReviewFrame, String> {
        super::hover_field(&state, hover)
    }

    #[tauri::command]
    pub fn pointer_move(state: State<'_, AppState>, x: f64, y: f64) -> Result<Option<ReviewFrame>, String> {
        super::pointer_move(&state, x, y)
    }

    #[tauri::command]
    pub fn pointer_leave(state: State<'_, AppState>) -> Result<Option<ReviewFrame>, String> {
        super::pointer_leave(&state)
    }

    #[tauri::command]
    pub fn set_container_width(state: State<'_, AppState>, width: f64) -> Result<ReviewFrame, String> {
        super::set_container_width(&state, width)
    }

    #[tauri::command]
    pub fn zoom_in(state: State<'_, AppState>) -> Result<ReviewFrame, String> {
        super::zoom_in(&state)
    }

    #[tauri::command]
    pub fn zoom_out(state: State<'_, AppState>) -> Result<ReviewFrame, String> {
        super::zoom_out(&state)
    }

    #[tauri::command]
    pub fn zoom_reset(state: State<'_, AppState>) -> Result<ReviewFrame, String> {
        super::zoom_reset(&state)
    }

    #[tauri::command]
    pub fn zoom_wheel(
        state: State<'_, AppState>,
        delta_y: f64,
        modifier: bool,
    ) -> Result<Option<ReviewFrame>, String> {
        super::zoom_wheel(&state, delta_y, modifier)
    }

    #[tauri::command]
    pub async fn correct_field(
        state: State<'_, AppState>,
        field_index: usize,
        value: String,
    ) -> Result<ReviewFrame, String> {
        let document_id = super::current_document_id(&state)?;
        {
            let session = state.session()?;
            crate::review::correct_field(session.fields(), field_index, &value).map_err(|e| e.to_string())?;
        }
        let config = state.config.clone();
        let doc = tauri::async_runtime::spawn_blocking(move || {
            let api = ApiClient::new(&config).map_err(|e| e.to_string())?;
            api.update_field(&document_id, field_index, &value)
                .map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())??;
        super::show_document(&state, doc)
    }

    #[tauri::command]
    pub async fn mark_reviewed(state: State<'_, AppState>) -> Result<ReviewFrame, String> {
        let document_id = super::current_document_id(&state)?;
        let config = state.config.clone();
        let doc = tauri::async_runtime::spawn_blocking(move || {
            let api = ApiClient::new(&config).map_err(|e| e.to_string())?;
            api.mark_reviewed(&document_id).map_err(|e| e.to_string())
        })
        .await
        .map_err(|e| e.to_string())??;
        super::show_document(&state, doc)
    }

    /// Fetch on the blocking pool; whichever request was made last wins.
    #[tauri::command]
    pub async fn request_image(
        state: State<'_, AppState>,
        reference: Option<ImageReference>,
    ) -> Result<ReviewFrame, String> {
        let Some(ticket) = super::start_image(&state, reference)? else {
            return super::recompute_frame(&state);
        };
        let config = state.config.clone();
        let pending = ticket.clone();
        let outcome = tauri::async_runtime::spawn_blocking(move || super::fetch_image(&config, &pending))
            .await
            .map_err(|e| e.to_string())?;
        super::finish_image(&state, &ticket, outcome)
    }

    #[tauri::command]
    pub fn release_image(state: State<'_, AppState>) -> Result<ReviewFrame, String> {
        super::release_image(&state)
    }

    #[tauri::command]
    pub fn image_data_url(state: State<'_, AppState>) -> Result<Option<String>, String> {
        super::image_data_url(&state)
    }

    #[tauri::command]
    pub fn field_tables(state: State<'_, AppState>) -> Result<FieldLayout, String> {
        super::field_tables(&state)
    }

    #[tauri::command]
    pub async fn export_run(
        state: State<'_, AppState>,
        run_id: String,
        format: ExportFormat,
        export_keys: Option<HashMap<String, String>>,
        path: Option<String>,
    ) -> Result<ExportResult, String> {
        let config = state.config.clone();
        tauri::async_runtime::spawn_blocking(move || {
            super::export_run(&config, &run_id, &export_keys.unwrap_or_default(), format, path)
        })
        .await
        .map_err(|e| e.to_string())?
    }

    #[tauri::command]
    pub fn open_export_folder(state: State<'_, AppState>) -> Result<(), String> {
        super::open_export_folder(&state)
    }
}
