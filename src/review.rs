//! The document review session: the one place that owns review state and
//! turns it into something to draw.
//!
//! Nothing here observes anything. The shell calls a mutator (load a document,
//! move the pointer, zoom, resolve an image fetch) and then `recompute()` to get
//! a fresh `ReviewFrame`.

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, ReviewError};
use crate::highlight::{highlight_text, SegmentView};
use crate::image_loader::{FetchTicket, ImageLoader, ImageReference, ImageState, LoadOutcome};
use crate::models::{FieldSelection, HoverTarget};
use crate::cache::blob_store;
use crate::types::{ExtractedField, ReviewDocument};
use crate::viewport::{
    hit_test, overlay_frame, DisplayTransform, EstimatedMeasure, OverlayConfig, OverlayFrame,
    TextMeasure, Zoom,
};

/// Apply a reviewer correction and return the new field list. The first
/// correction keeps the extracted value in `original_value`; an empty backup
/// counts as none.
pub fn correct_field(
    fields: &[ExtractedField],
    index: usize,
    value: &str,
) -> Result<Vec<ExtractedField>> {
    if index >= fields.len() {
        return Err(ReviewError::FieldIndex {
            index,
            len: fields.len(),
        });
    }
    let mut updated = fields.to_vec();
    let field = &mut updated[index];
    if field.original_value.as_deref().map_or(true, str::is_empty) {
        field.original_value = Some(field.value.clone());
    }
    field.value = value.to_string();
    field.is_corrected = true;
    Ok(updated)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageView {
    /// "idle", "loading", "ready" or "broken".
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ImageView {
    fn from_state(state: &ImageState) -> Self {
        let empty = Self {
            status: "idle",
            url: None,
            width: None,
            height: None,
            blob_id: None,
            error: None,
        };
        match state {
            ImageState::Idle => empty,
            ImageState::Loading(reference) => Self {
                status: "loading",
                url: Some(reference.url.clone()),
                ..empty
            },
            ImageState::Ready(image) => Self {
                status: "ready",
                url: Some(image.reference.url.clone()),
                width: Some(image.width),
                height: Some(image.height),
                blob_id: Some(image.handle.id()),
                ..empty
            },
            ImageState::Broken { reference, reason } => Self {
                status: "broken",
                url: Some(reference.url.clone()),
                error: Some(reason.clone()),
                ..empty
            },
        }
    }
}

/// Everything the review screen shows for the current state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub segments: Vec<SegmentView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<OverlayFrame>,
    pub zoom: f64,
    pub zoom_label: String,
    pub image: ImageView,
    pub selection: FieldSelection,
    pub hover: HoverTarget,
}

pub struct ReviewSession {
    document: Option<ReviewDocument>,
    fields: Vec<ExtractedField>,
    raw_text: String,
    selection: FieldSelection,
    hover: HoverTarget,
    zoom: Zoom,
    container_width: f64,
    image: ImageLoader,
    config: OverlayConfig,
    measure: Box<dyn TextMeasure + Send>,
}

impl Default for ReviewSession {
    fn default() -> Self {
        Self::new(OverlayConfig::default())
    }
}

impl ReviewSession {
    pub fn new(config: OverlayConfig) -> Self {
        Self {
            document: None,
            fields: Vec::new(),
            raw_text: String::new(),
            selection: FieldSelection::None,
            hover: HoverTarget::None,
            zoom: Zoom::default(),
            container_width: 0.0,
            image: ImageLoader::new(),
            config,
            measure: Box::new(EstimatedMeasure),
        }
    }

    pub fn document(&self) -> Option<&ReviewDocument> {
        self.document.as_ref()
    }

    pub fn fields(&self) -> &[ExtractedField] {
        &self.fields
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn selection(&self) -> &FieldSelection {
        &self.selection
    }

    pub fn hover(&self) -> &HoverTarget {
        &self.hover
    }

    pub fn zoom(&self) -> Zoom {
        self.zoom
    }

    pub fn image_state(&self) -> &ImageState {
        self.image.state()
    }

    /// Show `doc`. A different document starts with no selection or hover; a
    /// reload of the same one keeps whatever still points at a field.
    pub fn load_document(&mut self, mut doc: ReviewDocument) {
        let same = self.document.as_ref().map(|d| d.id == doc.id).unwrap_or(false);
        let fields = std::mem::take(&mut doc.extracted_fields);
        self.raw_text = doc.raw_text.clone().unwrap_or_default();
        info!(document_id = %doc.id, fields = fields.len(), "document loaded");
        self.document = Some(doc);
        if !same {
            self.selection = FieldSelection::None;
            self.hover = HoverTarget::None;
        }
        self.replace_fields(fields);
    }

    /// Swap in a new field list wholesale.
    pub fn replace_fields(&mut self, fields: Vec<ExtractedField>) {
        self.fields = fields;
        if self.selection != FieldSelection::None && self.selection.resolve(&self.fields).is_none() {
            debug!(selection = ?self.selection, "selection no longer points at a field");
            self.selection = FieldSelection::None;
        }
        if !self.hover.is_none() && self.hover.resolve(&self.fields).is_none() {
            self.hover = HoverTarget::None;
        }
    }

    pub fn correct_field(&mut self, index: usize, value: &str) -> Result<()> {
        let updated = correct_field(&self.fields, index, value)?;
        info!(
            document_id = %self.document.as_ref().map(|d| d.id.as_str()).unwrap_or(""),
            field = %updated[index].name,
            "field corrected"
        );
        self.replace_fields(updated);
        Ok(())
    }

    pub fn select(&mut self, selection: FieldSelection) {
        self.selection = selection;
    }

    pub fn set_hover(&mut self, hover: HoverTarget) {
        self.hover = hover;
    }

    /// Hit-test a pointer position in surface pixels. Returns true when the
    /// hover target changed and the overlay needs a redraw.
    pub fn pointer_move(&mut self, x: f64, y: f64) -> bool {
        let hit = self
            .transform()
            .and_then(|t| hit_test(&self.fields, &t, x, y));
        let next = match hit {
            Some(i) => HoverTarget::Index(i),
            None if self.hover.from_pointer() => HoverTarget::None,
            None => return false,
        };
        if next == self.hover {
            return false;
        }
        self.hover = next;
        true
    }

    /// The pointer left the image. Clears hover that came from the overlay.
    pub fn pointer_leave(&mut self) -> bool {
        if self.hover.from_pointer() {
            self.hover = HoverTarget::None;
            true
        } else {
            false
        }
    }

    pub fn set_container_width(&mut self, width: f64) {
        self.container_width = if width.is_finite() { width.max(0.0) } else { 0.0 };
    }

    pub fn zoom_in(&mut self) -> Zoom {
        self.zoom = self.zoom.zoom_in();
        self.zoom
    }

    pub fn zoom_out(&mut self) -> Zoom {
        self.zoom = self.zoom.zoom_out();
        self.zoom
    }

    pub fn zoom_reset(&mut self) -> Zoom {
        self.zoom = self.zoom.reset();
        self.zoom
    }

    /// Returns true when the wheel event changed the zoom.
    pub fn zoom_wheel(&mut self, delta_y: f64, modifier: bool) -> bool {
        let next = self.zoom.wheel(delta_y, modifier);
        let changed = next != self.zoom;
        self.zoom = next;
        changed
    }

    /// Ask for `reference` to be shown. `None` when it is already loading or
    /// shown; otherwise the caller fetches and hands the ticket back to
    /// `resolve_image`. A new image starts at 100% zoom.
    pub fn request_image(&mut self, reference: ImageReference) -> Option<FetchTicket> {
        let current = self.image.current_reference() == Some(&reference);
        if current && matches!(self.image.state(), ImageState::Loading(_) | ImageState::Ready(_)) {
            return None;
        }
        if !current {
            self.zoom = self.zoom.reset();
        }
        Some(self.image.request(reference))
    }

    pub fn resolve_image(&mut self, ticket: &FetchTicket, outcome: LoadOutcome) -> bool {
        self.image.resolve(ticket, outcome)
    }

    /// The image pane went away.
    pub fn release_image(&mut self) {
        self.image.release();
    }

    /// `data:` URL of the shown image, if any.
    pub fn image_data_url(&self) -> Option<String> {
        self.image.ready().and_then(|img| blob_store::data_url(img.handle))
    }

    /// Current fit-and-zoom transform; `None` until an image is ready.
    pub fn transform(&self) -> Option<DisplayTransform> {
        self.image.ready().map(|img| {
            DisplayTransform::compute(img.width, img.height, self.container_width, self.zoom, &self.config)
        })
    }

    pub fn recompute(&self) -> ReviewFrame {
        let segments = highlight_text(&self.raw_text, &self.fields, &self.selection, &self.hover);
        let overlay = self.image.ready().zip(self.transform()).map(|(img, transform)| {
            overlay_frame(
                &self.fields,
                (img.width, img.height),
                &transform,
                &self.selection,
                &self.hover,
                &self.config,
                self.measure.as_ref(),
            )
        });
        ReviewFrame {
            document_id: self.document.as_ref().map(|d| d.id.clone()),
            segments,
            overlay,
            zoom: self.zoom.value(),
            zoom_label: self.zoom.percent_label(),
            image: ImageView::from_state(self.image.state()),
            selection: self.selection.clone(),
            hover: self.hover.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_loader::decode_image;
    use crate::image_loader::tests::png_bytes;
    use crate::types::BoundingBox;

    fn document(id: &str) -> ReviewDocument {
        ReviewDocument {
            id: id.to_string(),
            filename: format!("{}.png", id),
            mime_type: Some("image/png".to_string()),
            status: "processed".to_string(),
            raw_text: Some("Invoice 2024 total 100.00".to_string()),
            preview_image: None,
            extracted_fields: vec![
                ExtractedField::new("year", "2024").with_coordinate(BoundingBox::new(10.0, 10.0, 50.0, 30.0)),
                ExtractedField::new("total", "100.00").with_coordinate(BoundingBox::new(100.0, 100.0, 200.0, 120.0)),
            ],
        }
    }

    fn with_image(session: &mut ReviewSession, url: &str, w: u32, h: u32) {
        let ticket = session.request_image(ImageReference::public(url)).unwrap();
        let image = decode_image(png_bytes(w, h)).unwrap();
        assert!(session.resolve_image(&ticket, LoadOutcome::Loaded(image)));
    }

    #[test]
    fn correction_keeps_first_original_value() {
        let fields = vec![ExtractedField::new("total", "100.00")];
        let once = correct_field(&fields, 0, "101.00").unwrap();
        let twice = correct_field(&once, 0, "102.00").unwrap();
        assert_eq!(twice[0].value, "102.00");
        assert_eq!(twice[0].original_value.as_deref(), Some("100.00"));
        assert!(twice[0].is_corrected);
        assert!(!fields[0].is_corrected);
    }

    #[test]
    fn empty_backup_is_replaced_by_current_value() {
        let mut field = ExtractedField::new("total", "100.00");
        field.original_value = Some(String::new());
        let corrected = correct_field(&[field], 0, "101.00").unwrap();
        assert_eq!(corrected[0].original_value.as_deref(), Some("100.00"));
    }

    #[test]
    fn pointer_over_second_row_draws_that_row() {
        let mut session = ReviewSession::default();
        let mut doc = document("rows");
        doc.raw_text = Some("Bolts and Nuts".to_string());
        doc.extracted_fields = vec![
            ExtractedField::new("item", "Bolts")
                .in_group("lines", 0)
                .with_coordinate(BoundingBox::new(0.0, 0.0, 50.0, 10.0)),
            ExtractedField::new("item", "Nuts")
                .in_group("lines", 1)
                .with_coordinate(BoundingBox::new(0.0, 100.0, 50.0, 110.0)),
        ];
        session.load_document(doc);
        session.set_container_width(848.0);
        with_image(&mut session, "http://x/rows.png", 800, 600);

        assert!(session.pointer_move(10.0, 105.0));
        assert_eq!(session.hover(), &HoverTarget::Index(1));

        let frame = session.recompute();
        let boxes = frame.overlay.unwrap().boxes;
        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].field_index, 1);
        assert_eq!(boxes[0].rect.y, 100.0);
        let hovered: Vec<&str> = frame
            .segments
            .iter()
            .filter(|s| s.hovered)
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(hovered, vec!["Nuts"]);

        assert!(session.pointer_leave());
        assert!(session.hover().is_none());
    }

    #[test]
    fn correction_out_of_range_fails() {
        let err = correct_field(&[], 3, "x").unwrap_err();
        assert!(matches!(err, ReviewError::FieldIndex { index: 3, len: 0 }));
    }

    #[test]
    fn frame_without_image_has_text_only() {
        let mut session = ReviewSession::default();
        session.load_document(document("d1"));
        let frame = session.recompute();
        assert_eq!(frame.document_id.as_deref(), Some("d1"));
        assert!(frame.overlay.is_none());
        assert_eq!(frame.image.status, "idle");
        let highlighted: Vec<&str> = frame
            .segments
            .iter()
            .filter(|s| s.field_index.is_some())
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(highlighted, vec!["2024", "100.00"]);
    }

    #[test]
    fn selection_emphasizes_text_and_overlay() {
        let mut session = ReviewSession::default();
        session.load_document(document("d1"));
        session.set_container_width(848.0);
        with_image(&mut session, "http://x/d1.png", 800, 600);
        session.select(FieldSelection::Index(1));

        let frame = session.recompute();
        let overlay = frame.overlay.unwrap();
        assert_eq!(overlay.scale, 1.0);
        assert_eq!(overlay.boxes.len(), 1);
        assert_eq!(overlay.boxes[0].field_index, 1);
        assert!(frame.segments.iter().any(|s| s.selected && s.text == "100.00"));
        assert_eq!(frame.image.width, Some(800));
    }

    #[test]
    fn pointer_sets_and_clears_hover() {
        let mut session = ReviewSession::default();
        session.load_document(document("d1"));
        session.set_container_width(848.0);
        assert!(!session.pointer_move(20.0, 20.0));

        with_image(&mut session, "http://x/d1.png", 800, 600);
        assert!(session.pointer_move(20.0, 20.0));
        assert_eq!(session.hover(), &HoverTarget::Index(0));
        assert!(!session.pointer_move(21.0, 21.0));
        assert!(session.pointer_move(400.0, 400.0));
        assert!(session.hover().is_none());

        session.set_hover(HoverTarget::Value("100.00".into()));
        assert!(!session.pointer_leave());
        assert_eq!(session.hover(), &HoverTarget::Value("100.00".into()));
    }

    #[test]
    fn new_document_clears_selection_and_reload_keeps_it() {
        let mut session = ReviewSession::default();
        session.load_document(document("d1"));
        session.select(FieldSelection::Index(1));
        session.load_document(document("d1"));
        assert_eq!(session.selection(), &FieldSelection::Index(1));

        let mut shorter = document("d1");
        shorter.extracted_fields.truncate(1);
        session.load_document(shorter);
        assert_eq!(session.selection(), &FieldSelection::None);

        session.select(FieldSelection::Index(0));
        session.load_document(document("d2"));
        assert_eq!(session.selection(), &FieldSelection::None);
    }

    #[test]
    fn new_image_resets_zoom_but_same_image_is_not_refetched() {
        let mut session = ReviewSession::default();
        with_image(&mut session, "http://x/a.png", 100, 100);
        session.zoom_in();
        assert!(session.request_image(ImageReference::public("http://x/a.png")).is_none());
        assert_eq!(session.zoom().value(), 1.25);

        let ticket = session.request_image(ImageReference::public("http://x/b.png"));
        assert!(ticket.is_some());
        assert_eq!(session.zoom().value(), 1.0);
    }

    #[test]
    fn released_image_blob_is_revoked() {
        let mut session = ReviewSession::default();
        with_image(&mut session, "http://x/a.png", 4, 4);
        assert!(session.image_data_url().unwrap().starts_with("data:image/png;base64,"));
        let handle = session.image.ready().unwrap().handle;
        session.release_image();
        assert!(!blob_store::is_live(handle));
        assert_eq!(session.recompute().image.status, "idle");
    }

    #[test]
    fn wheel_without_modifier_does_not_zoom() {
        let mut session = ReviewSession::default();
        assert!(!session.zoom_wheel(-100.0, false));
        assert!(session.zoom_wheel(-100.0, true));
        assert_eq!(session.recompute().zoom_label, "125%");
    }

    #[test]
    fn correcting_updates_highlights() {
        let mut session = ReviewSession::default();
        session.load_document(document("d1"));
        session.correct_field(1, "999").unwrap();
        let frame = session.recompute();
        assert!(!frame.segments.iter().any(|s| s.text == "100.00" && s.field_index.is_some()));
        assert!(session.correct_field(5, "x").is_err());
    }
}
