//! Signed image URLs
//!
//! Post images are stored behind public URLs of the form
//! `.../public/<bucket>/<path>`; the client swaps them for signed URLs, cached
//! until 90% of their lifetime has passed.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::backend::Backend;
use crate::cache::{current_timestamp_ms, keys, FreshnessCache};
use crate::error::Result;

/// Location of an object in backend storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePath {
    pub bucket: String,
    pub path: String,
}

/// Parses `<...>/public/<bucket>/<path...>[?query]` into bucket and path.
pub fn extract_file_path(url: &str) -> Option<StoragePath> {
    let base = url.split('?').next()?;
    let parts: Vec<&str> = base.split('/').collect();
    let public = parts.iter().position(|part| *part == "public")?;

    if public == 0 {
        return None;
    }
    let bucket = parts.get(public + 1).filter(|b| !b.is_empty())?;
    let path = parts[public + 2..].join("/");
    if path.is_empty() {
        return None;
    }
    Some(StoragePath {
        bucket: bucket.to_string(),
        path,
    })
}

// == Signed URL Cache ==
#[derive(Clone)]
pub struct SignedUrls {
    backend: Arc<dyn Backend>,
    cache: FreshnessCache,
}

impl SignedUrls {
    pub fn new(backend: Arc<dyn Backend>, cache: FreshnessCache) -> Self {
        Self { backend, cache }
    }

    /// Returns a signed URL for the object, from cache while still fresh.
    pub async fn signed_url(&self, bucket: &str, path: &str, expires_in: u64) -> Result<String> {
        let key = keys::signed_url(bucket, path);
        if let Some(url) = self.cache.get::<String>(&key).await? {
            return Ok(url);
        }

        let url = self.backend.create_signed_url(bucket, path, expires_in).await?;
        // Expire locally at 90% of the issued lifetime.
        let expires_at = current_timestamp_ms() + expires_in.saturating_mul(900);
        self.cache.set_until(&key, &url, expires_at).await?;
        Ok(url)
    }

    /// Signs a public post image URL, falling back to the original on any failure.
    pub async fn sign_post_image(&self, image_url: &str, expires_in: u64) -> String {
        let Some(location) = extract_file_path(image_url) else {
            debug!("Not a storage URL, leaving as is: {}", image_url);
            return image_url.to_string();
        };

        match self.signed_url(&location.bucket, &location.path, expires_in).await {
            Ok(url) => url,
            Err(err) => {
                warn!("Failed to sign {}: {}", image_url, err);
                image_url.to_string()
            }
        }
    }
}
