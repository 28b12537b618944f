//! Object key derivation.
//!
//! Two key shapes are produced:
//! - `archives/{item_id}.zip` for the generated archive of an item
//! - `items/{item_id}/{sanitized filename}` for arbitrary named files
//!
//! Filename sanitization is a pipeline of small steps, each exposed on its own:
//! [`split_extension`] → [`replace_disallowed`] → [`collapse_whitespace`] →
//! [`hyphenate`] → [`strip_leading_slash`], with [`sanitize_extension`] applied
//! to the extension. The mapping is lossy: distinct filenames may share a key.

use crate::error::{StorageError, StorageResult};

/// Prefix for generated item archives.
pub const ARCHIVE_PREFIX: &str = "archives";

/// Prefix for named files cached on behalf of an item.
pub const NAMED_PREFIX: &str = "items";

/// Maximum accepted item identifier length.
pub const MAX_ITEM_ID_LEN: usize = 128;

/// Content type for archive payloads.
pub const ARCHIVE_CONTENT_TYPE: &str = "application/zip";

/// Reject item identifiers that could escape their key prefix.
///
/// Identifiers are opaque to this layer, but they are interpolated into keys
/// unchanged, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_item_id(item_id: &str) -> StorageResult<()> {
    if item_id.is_empty() {
        return Err(StorageError::invalid_key("item id is empty"));
    }
    if item_id.len() > MAX_ITEM_ID_LEN {
        return Err(StorageError::invalid_key(format!(
            "item id exceeds {} characters",
            MAX_ITEM_ID_LEN
        )));
    }
    if !item_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(StorageError::invalid_key(format!(
            "item id contains unsupported characters: {}",
            item_id
        )));
    }
    Ok(())
}

/// Key of an item's generated archive.
///
/// Format: `archives/{item_id}.zip`
pub fn archive_key(item_id: &str) -> String {
    format!("{}/{}.zip", ARCHIVE_PREFIX, item_id)
}

/// Derive the key for an item, optionally for a named file belonging to it.
///
/// Fails with [`StorageError::InvalidKey`] for a malformed item id, or when the
/// filename sanitizes to an empty body (`"===.WAV"` would otherwise become the
/// bare key `".wav"`).
pub fn derive_key(item_id: &str, filename: Option<&str>) -> StorageResult<String> {
    validate_item_id(item_id)?;

    let Some(filename) = filename else {
        return Ok(archive_key(item_id));
    };

    let (body, extension) = split_extension(filename);
    let body = sanitize_body(body);
    if body.is_empty() {
        return Err(StorageError::invalid_key(format!(
            "filename has no usable characters: {:?}",
            filename
        )));
    }

    Ok(format!(
        "{}/{}/{}{}",
        NAMED_PREFIX,
        item_id,
        body,
        sanitize_extension(extension)
    ))
}

/// Sanitize a free-form filename into an object-store-safe key.
///
/// `"My Book (Part 1)/Chapter.MP3"` becomes `"my-book-part-1/chapter.mp3"`.
/// May return an empty string or a bare extension; [`derive_key`] guards that.
pub fn sanitize_filename(filename: &str) -> String {
    let (body, extension) = split_extension(filename);
    let mut key = sanitize_body(body);
    key.push_str(&sanitize_extension(extension));
    key
}

fn sanitize_body(body: &str) -> String {
    let replaced = replace_disallowed(body);
    let collapsed = collapse_whitespace(&replaced);
    let hyphenated = hyphenate(&collapsed);
    strip_leading_slash(&hyphenated).to_string()
}

/// Split at the last dot. The extension keeps its leading dot.
///
/// No dot, or a dot only at position 0, means no extension. A dot inside a
/// directory part still splits there; [`sanitize_extension`] then drops the
/// `/` characters that land in the extension.
pub fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => filename.split_at(idx),
        _ => (filename, ""),
    }
}

/// Replace every character that is not an ASCII letter, digit, whitespace,
/// or `/` with a space.
pub fn replace_disallowed(body: &str) -> String {
    body.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c.is_whitespace() || c == '/' {
                c
            } else {
                ' '
            }
        })
        .collect()
}

/// Trim and collapse whitespace within each `/`-separated segment.
///
/// Segments left empty are dropped, so `"a / /b"` becomes `"a/b"`.
pub fn collapse_whitespace(body: &str) -> String {
    body.split('/')
        .map(|segment| segment.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Lowercase and replace each space with a dash.
pub fn hyphenate(body: &str) -> String {
    body.to_lowercase().replace(' ', "-")
}

/// Keys must not begin with `/`.
pub fn strip_leading_slash(body: &str) -> &str {
    body.strip_prefix('/').unwrap_or(body)
}

/// Lowercase the extension and keep only `[a-z0-9.]`.
pub fn sanitize_extension(extension: &str) -> String {
    extension
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '.')
        .collect()
}

/// Content type inferred from a key's extension.
pub fn content_type_for(key: &str) -> &'static str {
    let name = key.rsplit('/').next().unwrap_or(key);
    let extension = match split_extension(name).1.strip_prefix('.') {
        Some(ext) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };

    match extension.as_str() {
        "zip" => ARCHIVE_CONTENT_TYPE,
        "m4b" | "m4a" => "audio/mp4",
        "mp3" => "audio/mpeg",
        "flac" => "audio/flac",
        "ogg" | "opus" => "audio/ogg",
        "wav" => "audio/wav",
        "epub" => "application/epub+zip",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        _ => "application/octet-stream",
    }
}
