//! The `image://` identifier scheme used by the UI layer.
//!
//! Standard images are addressed as
//! `image://gallery-standard/<absolute-path>?edit=<revision>&orientation=<code>`
//! and thumbnails as `image://gallery-thumbnail/<absolute-path>?edit=<revision>`.
//! Both parameters are optional. Parsing never fails: a malformed identifier
//! resolves to revision 0 with no orientation override, and a string that is
//! not a URL at all is taken as a bare file path.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Which serving policy a provider applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SizeClass {
    /// Full/standard images, decoded from the source file.
    Standard,
    /// Thumbnail-class images, served from pre-generated preview files.
    Thumbnail,
}

impl SizeClass {
    /// The host component of this class's identifier scheme.
    pub fn host(&self) -> &'static str {
        match self {
            SizeClass::Standard => "gallery-standard",
            SizeClass::Thumbnail => "gallery-thumbnail",
        }
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.host())
    }
}

/// A parsed request identifier: the source file plus variant parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequest {
    pub source: PathBuf,
    pub revision: i64,
    pub orientation: Option<i32>,
}

// Bytes that must be escaped in the path component, beyond controls.
const PATH_ESCAPES: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Produce the identifier URL for `path` with no variant parameters.
///
/// The path component is exactly the given path, percent-encoded, so an
/// absolute path keeps its leading slash after the host separator:
/// `to_url(Thumbnail, "/tmp/test.jpg")` is
/// `image://gallery-thumbnail//tmp/test.jpg`.
pub fn to_url(class: SizeClass, path: &Path) -> String {
    to_url_with(class, path, 0, None)
}

/// Produce the identifier URL for `path`, appending `edit`/`orientation`
/// query parameters when they differ from the defaults.
pub fn to_url_with(class: SizeClass, path: &Path, revision: i64, orientation: Option<i32>) -> String {
    let path_str = path.to_string_lossy();
    let encoded = utf8_percent_encode(&path_str, PATH_ESCAPES);
    let mut url = format!("image://{}/{}", class.host(), encoded);
    let mut separator = '?';
    if revision != 0 {
        url.push(separator);
        url.push_str(&format!("edit={revision}"));
        separator = '&';
    }
    if let Some(code) = orientation {
        url.push(separator);
        url.push_str(&format!("orientation={code}"));
    }
    url
}

/// Parse a request identifier into its source path and variant parameters.
pub fn parse(identifier: &str) -> ImageRequest {
    match Url::parse(identifier) {
        Ok(url) if url.scheme() == "image" => {
            let decoded = percent_decode_str(url.path()).decode_utf8_lossy();
            // to_url appends the absolute path after the host separator, so
            // the path component carries one extra leading slash.
            let path = match decoded.strip_prefix('/') {
                Some(rest) if rest.starts_with('/') => rest.to_string(),
                _ => decoded.into_owned(),
            };
            let (revision, orientation) = parse_query(url.query().unwrap_or(""));
            ImageRequest {
                source: PathBuf::from(path),
                revision,
                orientation,
            }
        }
        _ => {
            // Bare id form: a file path with optional query-style parameters.
            let (path, query) = match identifier.split_once('?') {
                Some((path, query)) => (path, query),
                None => (identifier, ""),
            };
            let (revision, orientation) = parse_query(query);
            ImageRequest {
                source: PathBuf::from(path),
                revision,
                orientation,
            }
        }
    }
}

fn parse_query(query: &str) -> (i64, Option<i32>) {
    let mut revision = 0;
    let mut orientation = None;
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match name.as_ref() {
            "edit" => revision = value.parse().unwrap_or(0),
            "orientation" => orientation = value.parse().ok(),
            _ => {}
        }
    }
    (revision, orientation)
}
