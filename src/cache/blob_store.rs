//! Process-wide registry of fetched image bytes handed to the webview.
//!
//! A handle stays valid until it is revoked. Whoever registers a blob owns the
//! handle and must revoke it when the image is superseded or the view goes away.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub struct BlobHandle(u64);

impl BlobHandle {
    pub fn id(self) -> u64 {
        self.0
    }
}

struct Blob {
    mime: String,
    bytes: Vec<u8>,
}

static STORE: OnceLock<Arc<RwLock<HashMap<u64, Blob>>>> = OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn store() -> &'static Arc<RwLock<HashMap<u64, Blob>>> {
    STORE.get_or_init(|| Arc::new(RwLock::new(HashMap::new())))
}

pub fn register(bytes: Vec<u8>, mime: &str) -> BlobHandle {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    if let Ok(mut guard) = store().write() {
        guard.insert(
            id,
            Blob {
                mime: mime.to_string(),
                bytes,
            },
        );
    }
    BlobHandle(id)
}

pub fn is_live(handle: BlobHandle) -> bool {
    store()
        .read()
        .map(|guard| guard.contains_key(&handle.0))
        .unwrap_or(false)
}

/// `data:` URL the webview can use as an image source.
pub fn data_url(handle: BlobHandle) -> Option<String> {
    let guard = store().read().ok()?;
    let blob = guard.get(&handle.0)?;
    Some(format!("data:{};base64,{}", blob.mime, BASE64.encode(blob.bytes.as_slice())))
}

/// Returns false if the handle was already gone.
pub fn revoke(handle: BlobHandle) -> bool {
    match store().write() {
        Ok(mut guard) => guard.remove(&handle.0).is_some(),
        Err(_) => false,
    }
}
