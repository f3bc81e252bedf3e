//! Fetching the document image and keeping only the latest request.
//!
//! Every request bumps a generation counter and hands out a ticket. A result is
//! applied only if its ticket still matches the current generation and image
//! reference, so a slow fetch for an old image can never replace a newer one.

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cache::blob_store::{self, BlobHandle};
use crate::error::{Result, ReviewError};

/// Where the image comes from and whether it sits behind the API token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReference {
    pub url: String,
    #[serde(default)]
    pub authenticated: bool,
}

impl ImageReference {
    pub fn public(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            authenticated: false,
        }
    }

    pub fn authenticated(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            authenticated: true,
        }
    }
}

pub trait ImageFetcher {
    fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<Vec<u8>>;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<Vec<u8>> {
        let mut request = self.client.get(url);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(ReviewError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes()?.to_vec())
    }
}

/// Decoded header information plus the raw bytes.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub width: u32,
    pub height: u32,
}

pub fn decode_image(bytes: Vec<u8>) -> Result<FetchedImage> {
    let reader = image::ImageReader::new(Cursor::new(bytes.as_slice())).with_guessed_format()?;
    let mime = reader
        .format()
        .map(|f| f.to_mime_type().to_string())
        .ok_or_else(|| ReviewError::Image("unknown image format".to_string()))?;
    let (width, height) = reader.into_dimensions()?;
    Ok(FetchedImage {
        bytes,
        mime,
        width,
        height,
    })
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(FetchedImage),
    Failed(String),
}

/// Authenticated fetch first (when the reference needs it and a token exists),
/// then the same URL without credentials. Never returns an error: a failed
/// load becomes `LoadOutcome::Failed` and the pane shows a broken image.
pub fn load_image(
    fetcher: &dyn ImageFetcher,
    reference: &ImageReference,
    token: Option<&str>,
) -> LoadOutcome {
    let token = token.filter(|t| reference.authenticated && !t.trim().is_empty());
    let fetched = match token {
        Some(token) => fetcher.fetch(&reference.url, Some(token)).or_else(|e| {
            warn!(url = %reference.url, error = %e, "authenticated image fetch failed, loading directly");
            fetcher.fetch(&reference.url, None)
        }),
        None => fetcher.fetch(&reference.url, None),
    };

    let bytes = match fetched {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(url = %reference.url, error = %e, "image fetch failed");
            return LoadOutcome::Failed(e.to_string());
        }
    };

    match decode_image(bytes) {
        Ok(image) => LoadOutcome::Loaded(image),
        Err(e) => {
            warn!(url = %reference.url, error = %e, "image decode failed");
            LoadOutcome::Failed(e.to_string())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedImage {
    pub reference: ImageReference,
    pub handle: BlobHandle,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ImageState {
    #[default]
    Idle,
    Loading(ImageReference),
    Ready(LoadedImage),
    Broken {
        reference: ImageReference,
        reason: String,
    },
}

/// Proof of a request; carry it to `ImageLoader::resolve` with the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    reference: ImageReference,
}

impl FetchTicket {
    pub fn reference(&self) -> &ImageReference {
        &self.reference
    }
}

#[derive(Debug, Default)]
pub struct ImageLoader {
    generation: u64,
    state: ImageState,
}

impl ImageLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &ImageState {
        &self.state
    }

    pub fn current_reference(&self) -> Option<&ImageReference> {
        match &self.state {
            ImageState::Idle => None,
            ImageState::Loading(reference) => Some(reference),
            ImageState::Ready(image) => Some(&image.reference),
            ImageState::Broken { reference, .. } => Some(reference),
        }
    }

    pub fn ready(&self) -> Option<&LoadedImage> {
        match &self.state {
            ImageState::Ready(image) => Some(image),
            _ => None,
        }
    }

    /// Start loading `reference`. Any earlier ticket becomes stale and the blob
    /// of the image being replaced is released.
    pub fn request(&mut self, reference: ImageReference) -> FetchTicket {
        self.release_blob();
        self.generation += 1;
        debug!(generation = self.generation, url = %reference.url, "image requested");
        self.state = ImageState::Loading(reference.clone());
        FetchTicket {
            generation: self.generation,
            reference,
        }
    }

    /// Apply a fetch result. Returns false (and drops the result) when the
    /// ticket is no longer the latest request.
    pub fn resolve(&mut self, ticket: &FetchTicket, outcome: LoadOutcome) -> bool {
        let current = matches!(&self.state, ImageState::Loading(r) if *r == ticket.reference);
        if ticket.generation != self.generation || !current {
            debug!(
                ticket = ticket.generation,
                generation = self.generation,
                url = %ticket.reference.url,
                "discarding stale image result"
            );
            return false;
        }

        self.state = match outcome {
            LoadOutcome::Loaded(image) => {
                let handle = blob_store::register(image.bytes, &image.mime);
                info!(
                    url = %ticket.reference.url,
                    width = image.width,
                    height = image.height,
                    "image ready"
                );
                ImageState::Ready(LoadedImage {
                    reference: ticket.reference.clone(),
                    handle,
                    width: image.width,
                    height: image.height,
                })
            }
            LoadOutcome::Failed(reason) => ImageState::Broken {
                reference: ticket.reference.clone(),
                reason,
            },
        };
        true
    }

    /// Drop the current image (view unmount). Pending tickets become stale.
    pub fn release(&mut self) {
        self.release_blob();
        self.generation += 1;
        self.state = ImageState::Idle;
    }

    fn release_blob(&mut self) {
        if let ImageState::Ready(image) = &self.state {
            blob_store::revoke(image.handle);
        }
    }
}

impl Drop for ImageLoader {
    fn drop(&mut self) {
        self.release_blob();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::HashMap;

    pub(crate) fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let mut out = Cursor::new(Vec::new());
        image::RgbaImage::new(width, height)
            .write_to(&mut out, image::ImageFormat::Png)
            .unwrap();
        out.into_inner()
    }

    /// Serves canned responses; records which URLs were asked with a token.
    #[derive(Default)]
    pub(crate) struct FakeFetcher {
        pub authed: HashMap<String, Vec<u8>>,
        pub public: HashMap<String, Vec<u8>>,
        pub calls: RefCell<Vec<(String, bool)>>,
    }

    impl ImageFetcher for FakeFetcher {
        fn fetch(&self, url: &str, bearer: Option<&str>) -> Result<Vec<u8>> {
            self.calls.borrow_mut().push((url.to_string(), bearer.is_some()));
            let source = if bearer.is_some() { &self.authed } else { &self.public };
            source.get(url).cloned().ok_or(ReviewError::Api {
                status: 401,
                body: "denied".to_string(),
            })
        }
    }

    fn loaded(width: u32, height: u32) -> LoadOutcome {
        LoadOutcome::Loaded(decode_image(png_bytes(width, height)).unwrap())
    }

    #[test]
    fn decode_reads_dimensions_and_mime() {
        let image = decode_image(png_bytes(2, 3)).unwrap();
        assert_eq!((image.width, image.height), (2, 3));
        assert_eq!(image.mime, "image/png");
        assert!(decode_image(b"not an image".to_vec()).is_err());
    }

    #[test]
    fn auth_failure_falls_back_to_direct_load() {
        let mut fetcher = FakeFetcher::default();
        fetcher.public.insert("http://x/a.png".into(), png_bytes(4, 4));
        let reference = ImageReference::authenticated("http://x/a.png");

        let outcome = load_image(&fetcher, &reference, Some("token"));
        assert!(matches!(outcome, LoadOutcome::Loaded(ref i) if i.width == 4));
        assert_eq!(
            *fetcher.calls.borrow(),
            vec![("http://x/a.png".to_string(), true), ("http://x/a.png".to_string(), false)]
        );
    }

    #[test]
    fn public_reference_never_sends_token() {
        let mut fetcher = FakeFetcher::default();
        fetcher.public.insert("http://x/p.png".into(), png_bytes(1, 1));
        let outcome = load_image(&fetcher, &ImageReference::public("http://x/p.png"), Some("token"));
        assert!(matches!(outcome, LoadOutcome::Loaded(_)));
        assert_eq!(*fetcher.calls.borrow(), vec![("http://x/p.png".to_string(), false)]);
    }

    #[test]
    fn both_paths_failing_is_an_outcome_not_an_error() {
        let fetcher = FakeFetcher::default();
        let outcome = load_image(&fetcher, &ImageReference::authenticated("http://x/missing"), Some("t"));
        assert!(matches!(outcome, LoadOutcome::Failed(_)));
    }

    #[test]
    fn last_requested_image_wins() {
        let mut loader = ImageLoader::new();
        let a = loader.request(ImageReference::public("a"));
        let b = loader.request(ImageReference::public("b"));

        assert!(loader.resolve(&b, loaded(10, 20)));
        assert!(!loader.resolve(&a, loaded(99, 99)));

        let ready = loader.ready().unwrap();
        assert_eq!(ready.reference.url, "b");
        assert_eq!((ready.width, ready.height), (10, 20));
    }

    #[test]
    fn stale_result_arriving_first_is_also_ignored() {
        let mut loader = ImageLoader::new();
        let a = loader.request(ImageReference::public("a"));
        let b = loader.request(ImageReference::public("b"));
        assert!(!loader.resolve(&a, loaded(1, 1)));
        assert!(matches!(loader.state(), ImageState::Loading(r) if r.url == "b"));
        assert!(loader.resolve(&b, loaded(2, 2)));
    }

    #[test]
    fn superseded_blob_is_revoked() {
        let mut loader = ImageLoader::new();
        let a = loader.request(ImageReference::public("a"));
        loader.resolve(&a, loaded(1, 1));
        let first = loader.ready().unwrap().handle;
        assert!(blob_store::is_live(first));

        let b = loader.request(ImageReference::public("b"));
        assert!(!blob_store::is_live(first));
        loader.resolve(&b, loaded(1, 1));
        let second = loader.ready().unwrap().handle;

        loader.release();
        assert!(!blob_store::is_live(second));
        assert_eq!(*loader.state(), ImageState::Idle);
    }

    #[test]
    fn dropping_loader_revokes_blob() {
        let handle = {
            let mut loader = ImageLoader::new();
            let t = loader.request(ImageReference::public("a"));
            loader.resolve(&t, loaded(1, 1));
            loader.ready().unwrap().handle
        };
        assert!(!blob_store::is_live(handle));
    }

    #[test]
    fn release_makes_pending_ticket_stale() {
        let mut loader = ImageLoader::new();
        let t = loader.request(ImageReference::public("a"));
        loader.release();
        assert!(!loader.resolve(&t, loaded(1, 1)));
        assert_eq!(*loader.state(), ImageState::Idle);
    }
}
