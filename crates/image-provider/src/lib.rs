//! Image serving core for Lumen Gallery
//!
//! This crate answers the UI's `image://` requests: it parses request
//! identifiers into fingerprinted variant keys, consults the shared pixel
//! cache, decodes on miss (through pre-generated preview files for
//! thumbnail-class requests), and always hands back an image. The pieces:
//!
//! - **Identifier scheme**: `image://gallery-standard` and
//!   `image://gallery-thumbnail` URLs with optional `edit`/`orientation`
//!   parameters; malformed input degrades to defaults instead of failing
//! - **Provider**: one type, parametrized by size class, with per-class
//!   decode policy (preview-backed thumbnails, scale-floor standard loads)
//! - **Preview manager**: background generation of on-disk `thumbs/` files
//!   with per-source request coalescing and batch warm-up
//! - **Context**: explicitly constructed [`GalleryCore`] owning the cache
//!   and preview manager, with a create/shutdown lifecycle

pub mod context;
pub mod ident;
pub mod io;
pub mod preview;
pub mod provider;

pub use context::{CoreConfig, GalleryCore};
pub use ident::{parse, to_url, to_url_with, ImageRequest, SizeClass};
pub use io::{CrateImageIo, ImageIo};
pub use preview::{PreviewHandle, PreviewManager, PreviewOutcome, PreviewState, PREVIEW_SIZE};
pub use provider::{ImageProvider, SCALED_LOAD_FLOOR};
