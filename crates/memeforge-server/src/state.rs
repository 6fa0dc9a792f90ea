//! Shared server state: uploaded images and the share broadcast channel.

use crate::config::ServerConfig;
use crate::error::ApiError;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

const CHANNEL_CAPACITY: usize = 256;

const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_MAGIC: &[u8] = &[0xFF, 0xD8, 0xFF];

/// MIME type from the leading bytes, if the format is accepted.
pub fn sniff_image(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(PNG_MAGIC) {
        Some("image/png")
    } else if bytes.starts_with(JPEG_MAGIC) {
        Some("image/jpeg")
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub mime: &'static str,
    pub bytes: Bytes,
    uploaded_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub id: Uuid,
    pub url: String,
}

/// Request to share an image with a chat through the connected bridges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareRequest {
    pub image_url: String,
    #[serde(default)]
    pub caption: Option<String>,
    /// Target chat. Bridges without a subscription receive every share.
    #[serde(default)]
    pub chat: Option<String>,
}

/// A share as forwarded to bot bridges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Share {
    pub id: Uuid,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShareResponse {
    pub id: Uuid,
    /// Number of bridges the share was handed to.
    pub bridges: usize,
}

pub struct AppState {
    pub config: ServerConfig,
    images: DashMap<Uuid, StoredImage>,
    shares: broadcast::Sender<Share>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let (shares, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            config,
            images: DashMap::new(),
            shares,
        }
    }

    /// Validate and keep an uploaded image.
    pub fn store_image(&self, bytes: Bytes) -> Result<UploadResponse, ApiError> {
        if bytes.is_empty() {
            return Err(ApiError::BadRequest("empty upload".to_string()));
        }
        let limit = self.config.max_upload_bytes;
        if bytes.len() > limit {
            return Err(ApiError::PayloadTooLarge { limit });
        }
        let mime = sniff_image(&bytes).ok_or(ApiError::UnsupportedMediaType)?;

        while self.images.len() >= self.config.max_images {
            if !self.evict_oldest() {
                break;
            }
        }

        let id = Uuid::new_v4();
        let size = bytes.len();
        self.images.insert(
            id,
            StoredImage {
                mime,
                bytes,
                uploaded_at: Instant::now(),
            },
        );
        info!("Stored {} image {} ({} bytes)", mime, id, size);
        Ok(UploadResponse {
            id,
            url: self.image_url(id),
        })
    }

    pub fn image(&self, id: Uuid) -> Option<StoredImage> {
        self.images.get(&id).map(|entry| entry.value().clone())
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_url(&self, id: Uuid) -> String {
        format!("{}/images/{}", self.config.public_url, id)
    }

    fn evict_oldest(&self) -> bool {
        let oldest = self
            .images
            .iter()
            .min_by_key(|entry| entry.value().uploaded_at)
            .map(|entry| *entry.key());
        match oldest {
            Some(id) => {
                self.images.remove(&id);
                debug!("Evicted image {}", id);
                true
            }
            None => false,
        }
    }

    /// Hand a share to every connected bridge.
    pub fn share(&self, request: ShareRequest) -> Result<ShareResponse, ApiError> {
        if request.image_url.trim().is_empty() {
            return Err(ApiError::BadRequest("image_url is required".to_string()));
        }
        let share = Share {
            id: Uuid::new_v4(),
            image_url: request.image_url,
            caption: request.caption,
            chat: request.chat,
        };
        let id = share.id;
        let bridges = self.shares.send(share).map_err(|_| ApiError::NoBridge)?;
        info!("Share {} handed to {} bridge(s)", id, bridges);
        Ok(ShareResponse { id, bridges })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Share> {
        self.shares.subscribe()
    }

    pub fn bridge_count(&self) -> usize {
        self.shares.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(len: usize) -> Bytes {
        let mut bytes = PNG_MAGIC.to_vec();
        bytes.resize(len.max(PNG_MAGIC.len()), 0);
        Bytes::from(bytes)
    }

    fn state() -> AppState {
        AppState::new(ServerConfig {
            max_upload_bytes: 64,
            max_images: 2,
            ..ServerConfig::default()
        })
    }

    #[test]
    fn test_sniff() {
        assert_eq!(sniff_image(&png(16)), Some("image/png"));
        assert_eq!(sniff_image(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(sniff_image(b"GIF89a"), None);
        assert_eq!(sniff_image(&[]), None);
    }

    #[test]
    fn test_store_and_fetch() {
        let state = state();
        let uploaded = state.store_image(png(32)).unwrap();
        assert_eq!(
            uploaded.url,
            format!("http://localhost:3030/images/{}", uploaded.id)
        );
        let image = state.image(uploaded.id).unwrap();
        assert_eq!(image.mime, "image/png");
        assert_eq!(image.bytes.len(), 32);
    }

    #[test]
    fn test_upload_validation() {
        let state = state();
        assert!(matches!(
            state.store_image(Bytes::new()),
            Err(ApiError::BadRequest(_))
        ));
        assert!(matches!(
            state.store_image(png(65)),
            Err(ApiError::PayloadTooLarge { limit: 64 })
        ));
        assert!(matches!(
            state.store_image(Bytes::from_static(b"<svg></svg>")),
            Err(ApiError::UnsupportedMediaType)
        ));
        assert_eq!(state.image_count(), 0);
    }

    #[test]
    fn test_evicts_oldest() {
        let state = state();
        let first = state.store_image(png(16)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = state.store_image(png(16)).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let third = state.store_image(png(16)).unwrap();

        assert_eq!(state.image_count(), 2);
        assert!(state.image(first.id).is_none());
        assert!(state.image(second.id).is_some());
        assert!(state.image(third.id).is_some());
    }

    #[test]
    fn test_share_needs_bridge() {
        let state = state();
        let request = ShareRequest {
            image_url: "http://localhost:3030/images/x".to_string(),
            caption: None,
            chat: None,
        };
        assert!(matches!(state.share(request.clone()), Err(ApiError::NoBridge)));

        let mut rx = state.subscribe();
        let response = state.share(request).unwrap();
        assert_eq!(response.bridges, 1);
        assert_eq!(rx.try_recv().unwrap().id, response.id);
    }
}
