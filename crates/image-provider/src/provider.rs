//! Request-facing image serving.
//!
//! One provider type serves both size classes; the class tag picks the decode
//! and caching policy. Requests never fail: whatever goes wrong, the caller
//! gets an image back, possibly the zero-sized placeholder.

use anyhow::Result;
use std::sync::Arc;

use pixel_cache::{PixelBuffer, PixelCache, VariantKey};

use crate::ident::{self, ImageRequest, SizeClass};
use crate::io::ImageIo;
use crate::preview::{PreviewManager, PreviewOutcome, PREVIEW_SIZE};

/// Requested dimensions below this floor are decoded downscaled to save
/// memory; at or above it the full-resolution decode is returned and any
/// further scaling is the caller's business.
pub const SCALED_LOAD_FLOOR: u32 = 360;

/// Serves decoded images for one identifier scheme (`image://gallery-standard`
/// or `image://gallery-thumbnail`), backed by the shared pixel cache and
/// preview manager.
pub struct ImageProvider {
    class: SizeClass,
    cache: Arc<PixelCache>,
    previews: Arc<PreviewManager>,
    io: Arc<dyn ImageIo>,
    log_requests: bool,
}

impl ImageProvider {
    pub(crate) fn new(
        class: SizeClass,
        cache: Arc<PixelCache>,
        previews: Arc<PreviewManager>,
        io: Arc<dyn ImageIo>,
        log_requests: bool,
    ) -> Self {
        Self {
            class,
            cache,
            previews,
            io,
            log_requests,
        }
    }

    pub fn size_class(&self) -> SizeClass {
        self.class
    }

    /// Resolve `identifier` to a decoded image.
    ///
    /// Returns the pixels and their actual dimensions. Decode failures are
    /// logged and answered with the empty placeholder; they are never
    /// escalated, since the UI must stay responsive whatever happens to the
    /// files underneath it.
    pub fn request_image(
        &self,
        identifier: &str,
        requested: Option<(u32, u32)>,
    ) -> (PixelBuffer, (u32, u32)) {
        let request = ident::parse(identifier);
        let (width, height) = requested.unwrap_or((0, 0));
        let key = VariantKey {
            source: request.source.clone(),
            revision: request.revision,
            width,
            height,
            orientation: request.orientation,
        };

        if let Some(pixels) = self.cache.get(&key) {
            if self.log_requests {
                log::debug!("{} cache hit: {identifier}", self.class);
            }
            let dims = pixels.dimensions();
            return (pixels, dims);
        }

        let decoded = match self.class {
            SizeClass::Thumbnail => self.decode_thumbnail(&request, requested),
            SizeClass::Standard => self.decode_standard(&request, requested),
        };

        match decoded {
            Ok(pixels) => {
                let dims = pixels.dimensions();
                self.cache.put(key, pixels.clone(), pixels.byte_len());
                if self.log_requests {
                    log::debug!(
                        "{} served {identifier} at {}x{}",
                        self.class,
                        dims.0,
                        dims.1
                    );
                }
                (pixels, dims)
            }
            Err(err) => {
                log::warn!("could not serve {identifier}: {err:#}");
                (PixelBuffer::empty(), (0, 0))
            }
        }
    }

    fn decode_standard(
        &self,
        request: &ImageRequest,
        requested: Option<(u32, u32)>,
    ) -> Result<PixelBuffer> {
        let target = match requested {
            Some((w, h)) if w > 0 && h > 0 && w.max(h) < SCALED_LOAD_FLOOR => Some((w, h)),
            _ => None,
        };
        self.io.decode(&request.source, target)
    }

    fn decode_thumbnail(
        &self,
        request: &ImageRequest,
        requested: Option<(u32, u32)>,
    ) -> Result<PixelBuffer> {
        let target = requested.filter(|&(w, h)| w > 0 && h > 0);
        match self.previews.ensure_preview(&request.source).wait() {
            PreviewOutcome::Ready(preview) => match self.io.decode(&preview, target) {
                Ok(pixels) => Ok(pixels),
                Err(err) => {
                    log::warn!(
                        "preview {} unreadable ({err:#}), decoding source directly",
                        preview.display()
                    );
                    self.decode_thumbnail_from_source(request, target)
                }
            },
            PreviewOutcome::Failed(reason) => {
                if self.log_requests {
                    log::debug!(
                        "preview generation failed for {} ({reason}), decoding source directly",
                        request.source.display()
                    );
                }
                self.decode_thumbnail_from_source(request, target)
            }
        }
    }

    fn decode_thumbnail_from_source(
        &self,
        request: &ImageRequest,
        target: Option<(u32, u32)>,
    ) -> Result<PixelBuffer> {
        self.io
            .decode(&request.source, Some(target.unwrap_or((PREVIEW_SIZE, PREVIEW_SIZE))))
    }
}
