use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

const HANDLE_SCHEME: &str = "blob:section-runtime/";

/// Opaque reference to an in-memory media payload, usable as a playback source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MediaHandle(String);

impl MediaHandle {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A registered payload and its content type.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub bytes: Arc<Vec<u8>>,
    pub mime: Option<String>,
}

/// Registry of live media handles. Every handle must be revoked by its owner
/// once superseded; `live_count` exposes what is still outstanding.
#[derive(Clone, Default)]
pub struct MediaHandles {
    entries: Arc<Mutex<HashMap<MediaHandle, MediaPayload>>>,
}

impl MediaHandles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, bytes: Arc<Vec<u8>>, mime: Option<String>) -> MediaHandle {
        let handle = MediaHandle(format!("{}{}", HANDLE_SCHEME, Uuid::new_v4()));
        if let Ok(mut guard) = self.entries.lock() {
            guard.insert(handle.clone(), MediaPayload { bytes, mime });
        }
        tracing::debug!("Registered media handle {}", handle);
        handle
    }

    pub fn resolve(&self, handle: &MediaHandle) -> Option<MediaPayload> {
        let guard = self.entries.lock().ok()?;
        guard.get(handle).cloned()
    }

    /// Inline `data:` form, playable by outputs that only take URLs.
    pub fn data_url(&self, handle: &MediaHandle) -> Option<String> {
        let payload = self.resolve(handle)?;
        let mime = payload.mime.as_deref().unwrap_or("application/octet-stream");
        Some(format!(
            "data:{};base64,{}",
            mime,
            BASE64_STANDARD.encode(payload.bytes.as_slice())
        ))
    }

    pub fn revoke(&self, handle: &MediaHandle) -> bool {
        let removed = self
            .entries
            .lock()
            .map(|mut guard| guard.remove(handle).is_some())
            .unwrap_or(false);
        if removed {
            tracing::debug!("Revoked media handle {}", handle);
        }
        removed
    }

    pub fn live_count(&self) -> usize {
        self.entries.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_revoke_releases_entry() {
        let handles = MediaHandles::new();
        let handle = handles.register(Arc::new(vec![1, 2, 3]), Some("audio/wav".into()));

        assert!(handle.as_str().starts_with(HANDLE_SCHEME));
        assert_eq!(handles.live_count(), 1);
        let payload = handles.resolve(&handle).unwrap();
        assert_eq!(payload.bytes.as_slice(), &[1, 2, 3]);
        assert_eq!(payload.mime.as_deref(), Some("audio/wav"));

        assert!(handles.revoke(&handle));
        assert!(!handles.revoke(&handle));
        assert_eq!(handles.live_count(), 0);
        assert!(handles.resolve(&handle).is_none());
    }

    #[test]
    fn data_url_encodes_payload() {
        let handles = MediaHandles::new();
        let handle = handles.register(Arc::new(b"abc".to_vec()), Some("audio/wav".into()));
        assert_eq!(
            handles.data_url(&handle).unwrap(),
            "data:audio/wav;base64,YWJj"
        );

        let untyped = handles.register(Arc::new(vec![0xff]), None);
        assert_eq!(
            handles.data_url(&untyped).unwrap(),
            "data:application/octet-stream;base64,/w=="
        );
        handles.revoke(&untyped);
        assert!(handles.data_url(&untyped).is_none());
    }

    #[test]
    fn clones_share_registry() {
        let handles = MediaHandles::new();
        let other = handles.clone();
        let handle = handles.register(Arc::new(Vec::new()), None);
        assert_eq!(other.live_count(), 1);
        other.revoke(&handle);
        assert_eq!(handles.live_count(), 0);
    }
}
