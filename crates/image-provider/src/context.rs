//! Application context owning the serving core.
//!
//! Construction is explicit: the hosting application builds one
//! [`GalleryCore`] at startup, hands out providers, and calls
//! [`GalleryCore::shutdown`] at termination. There is no lazily-initialized
//! global state.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use pixel_cache::{CacheStats, PixelCache, DEFAULT_CACHE_BUDGET};

use crate::ident::SizeClass;
use crate::io::{CrateImageIo, ImageIo};
use crate::preview::{PreviewManager, PREVIEW_SIZE};
use crate::provider::ImageProvider;

/// Tunables for the serving core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Byte budget of the decoded-pixel cache.
    pub cache_budget: usize,
    /// Long-edge resolution of generated preview files.
    pub preview_size: u32,
    /// Emit a trace line per request.
    pub log_requests: bool,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            cache_budget: DEFAULT_CACHE_BUDGET,
            preview_size: PREVIEW_SIZE,
            log_requests: false,
        }
    }
}

/// Owns the pixel cache and preview manager shared by every provider.
pub struct GalleryCore {
    config: CoreConfig,
    cache: Arc<PixelCache>,
    previews: Arc<PreviewManager>,
    io: Arc<dyn ImageIo>,
}

impl GalleryCore {
    /// Build a core with the production `image`-crate IO.
    pub fn new(config: CoreConfig) -> Self {
        Self::with_io(config, Arc::new(CrateImageIo))
    }

    /// Build a core over a custom [`ImageIo`], for hosts that decode
    /// differently (or tests).
    pub fn with_io(config: CoreConfig, io: Arc<dyn ImageIo>) -> Self {
        let cache = Arc::new(PixelCache::new(config.cache_budget));
        let previews = Arc::new(PreviewManager::new(Arc::clone(&io), config.preview_size));
        Self {
            config,
            cache,
            previews,
            io,
        }
    }

    /// A request-facing provider for the given size class, sharing this
    /// core's cache and preview manager.
    pub fn provider(&self, class: SizeClass) -> ImageProvider {
        ImageProvider::new(
            class,
            Arc::clone(&self.cache),
            Arc::clone(&self.previews),
            Arc::clone(&self.io),
            self.config.log_requests,
        )
    }

    pub fn cache(&self) -> &Arc<PixelCache> {
        &self.cache
    }

    pub fn previews(&self) -> &Arc<PreviewManager> {
        &self.previews
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// A source file was deleted: drop its cached variants and its preview.
    pub fn remove_source(&self, source: &Path) {
        let dropped = self.cache.invalidate(source);
        if dropped > 0 {
            log::debug!("dropped {dropped} cached variants of {}", source.display());
        }
        PreviewManager::remove_preview(source);
    }

    /// Wait for in-flight preview work to finish, then release the cache.
    ///
    /// Started generation runs to completion; shutdown never aborts it.
    pub fn shutdown(self) {
        self.previews.drain();
        self.cache.clear();
    }
}
