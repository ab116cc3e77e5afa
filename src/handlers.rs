use axum::{
    extract::{
        multipart::{Field, MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::StatusCode,
    Json,
};
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};
use std::{
    io::ErrorKind::AlreadyExists,
    time::{SystemTime, UNIX_EPOCH},
};

use crate::app::AppState;
use crate::errors::{Error, Result};
use crate::models::{ImageList, UploadResponse};
use crate::storage::ImageStore;

pub const IMAGE_FIELD: &str = "image";
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Fresh timestamps tried before giving up on a nanosecond name collision.
const MAX_NAME_ATTEMPTS: usize = 3;

pub fn generate_filename() -> String {
    let mut rng = thread_rng();

    (0..10)
        .map(|_| rng.sample(Alphanumeric) as char)
        .collect::<String>()
}

/// Whether `name` carries one of the allow-listed image extensions, ignoring case.
pub fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.iter().any(|allowed| allowed.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Last path component of a client-supplied filename, for either separator style.
pub fn base_name(original: &str) -> String {
    match original.rsplit(|c: char| c == '/' || c == '\\').next() {
        None | Some("" | "." | "..") => generate_filename(),
        Some(base) => base.to_string(),
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default()
}

pub fn stored_name(base: &str) -> String {
    format!("{}_{}", unix_nanos(), base)
}

/// Write `bytes` under a fresh `<nanos>_<base>` name, never replacing an existing file.
pub async fn save_unique(store: &dyn ImageStore, base: &str, bytes: &[u8]) -> Result<String> {
    let mut attempt = 1;
    loop {
        let name = stored_name(base);
        match store.create(&name, bytes).await {
            Ok(()) => return Ok(name),
            Err(err) if err.kind() == AlreadyExists && attempt < MAX_NAME_ATTEMPTS => {
                tracing::warn!(filename = %name, attempt, "Stored name already taken, retrying");
                attempt += 1;
            }
            Err(err) => {
                return Err(Error::internal(format!("Failed to save image file: {}", err)))
            }
        }
    }
}

fn form_error(cause: impl std::fmt::Display) -> Error {
    Error::bad_request(format!("Failed to get image file from form: {}", cause))
}

/// Combined budget for every form field other than `image`.
pub const FORM_FIELDS_LIMIT: u64 = 1024 * 1024;

/// Human-readable size for limit messages, in the largest whole unit.
fn describe_limit(limit: u64) -> String {
    const KIB: u64 = 1024;
    const MIB: u64 = 1024 * 1024;

    match limit {
        0 => "0 bytes".to_string(),
        l if l % MIB == 0 => format!("{}MB", l / MIB),
        l if l % KIB == 0 => format!("{}KB", l / KIB),
        l => format!("{} bytes", l),
    }
}

fn too_large(limit: u64) -> Error {
    Error::bad_request(format!("File size exceeds {} limit.", describe_limit(limit)))
}

/// Error while streaming the `image` field itself.
fn image_error(err: MultipartError, limit: u64) -> Error {
    // other fields are capped well below the body limit, so hitting it here means an oversize image
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        too_large(limit)
    } else {
        form_error(err)
    }
}

/// Buffer the image, bailing out as soon as it grows past `limit`.
async fn read_limited(mut field: Field<'_>, limit: u64) -> Result<Vec<u8>> {
    let mut data = Vec::new();

    while let Some(chunk) = field.chunk().await.map_err(|err| image_error(err, limit))? {
        if (data.len() + chunk.len()) as u64 > limit {
            tracing::warn!(
                received = data.len() + chunk.len(),
                limit,
                "Upload exceeds size limit, aborting"
            );
            return Err(too_large(limit));
        }
        data.extend_from_slice(&chunk);
    }

    Ok(data)
}

/// Read and discard a non-image field, charging it against `budget`.
async fn skip_field(mut field: Field<'_>, budget: &mut u64) -> Result<()> {
    while let Some(chunk) = field.chunk().await.map_err(form_error)? {
        let len = chunk.len() as u64;
        if len > *budget {
            return Err(form_error(format!(
                "fields other than `{}` exceed {}",
                IMAGE_FIELD,
                describe_limit(FORM_FIELDS_LIMIT)
            )));
        }
        *budget -= len;
    }
    Ok(())
}

pub async fn list_images(State(state): State<AppState>) -> Result<Json<ImageList>> {
    let entries = state
        .store
        .entries()
        .await
        .map_err(|err| Error::internal(format!("Failed to read upload directory: {}", err)))?;

    let images = entries
        .into_iter()
        .filter(|entry| !entry.is_dir && is_image_name(&entry.name))
        .map(|entry| entry.name)
        .collect();

    Ok(Json(ImageList { images }))
}

pub async fn upload_image(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Json<UploadResponse>> {
    let limit = state.config.max_upload_bytes;
    let mut multipart = multipart.map_err(|rejection| form_error(rejection.body_text()))?;
    let mut other_fields_budget = FORM_FIELDS_LIMIT;

    loop {
        let Some(field) = multipart.next_field().await.map_err(form_error)? else {
            return Err(form_error(format!("missing `{}` field", IMAGE_FIELD)));
        };

        if field.name() != Some(IMAGE_FIELD) {
            skip_field(field, &mut other_fields_budget).await?;
            continue;
        }

        let Some(original) = field.file_name().map(|s| s.to_string()) else {
            return Err(form_error(format!("`{}` field is not a file", IMAGE_FIELD)));
        };

        let bytes = read_limited(field, limit).await?;
        let filename = save_unique(state.store.as_ref(), &base_name(&original), &bytes).await?;

        tracing::info!(filename = %filename, size = bytes.len(), "Image uploaded");

        return Ok(Json(UploadResponse {
            message: "Image uploaded successfully".to_string(),
            filename,
        }));
    }
}

pub async fn healthz() -> StatusCode {
    StatusCode::OK
}

pub async fn not_found() -> Error {
    Error::not_found("Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StoredEntry};
    use async_trait::async_trait;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn extension_check_ignores_case() {
        for name in ["a.jpg", "b.JPEG", "c.Png", "d.gif", "e.webp", "f.BMP", "x.tar.png"] {
            assert!(is_image_name(name), "{name} should be listed");
        }
        for name in ["notes.txt", "doc.pdf", "png", "archive.png.zip", "trailing."] {
            assert!(!is_image_name(name), "{name} should be skipped");
        }
    }

    #[test]
    fn base_name_strips_directories() {
        assert_eq!(base_name("a.png"), "a.png");
        assert_eq!(base_name("../../etc/passwd.png"), "passwd.png");
        assert_eq!(base_name("/abs/path/b.gif"), "b.gif");
        assert_eq!(base_name(r"C:\Users\me\c.jpg"), "c.jpg");
    }

    #[test]
    fn base_name_replaces_empty_or_dot_names() {
        for original in ["", "dir/", "..", "a/.", r"a\.."] {
            let base = base_name(original);
            assert_eq!(base.len(), 10, "{original:?} gave {base:?}");
            assert!(base.chars().all(|c| c.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn stored_name_is_timestamp_prefixed() {
        let name = stored_name("a.png");
        let (prefix, rest) = name.split_once('_').unwrap();

        assert!(!prefix.is_empty());
        assert!(prefix.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(rest, "a.png");
    }

    #[tokio::test]
    async fn save_unique_keeps_both_copies() {
        let store = MemoryStore::default();

        let first = save_unique(&store, "a.png", b"one").await.unwrap();
        let second = save_unique(&store, "a.png", b"two").await.unwrap();

        assert_ne!(first, second);
        assert_eq!(store.get(&first).unwrap(), b"one");
        assert_eq!(store.get(&second).unwrap(), b"two");
    }

    /// Claims every name is taken for the first `collisions` calls.
    struct CollidingStore {
        collisions: usize,
        calls: AtomicUsize,
        inner: MemoryStore,
    }

    #[async_trait]
    impl ImageStore for CollidingStore {
        async fn entries(&self) -> io::Result<Vec<StoredEntry>> {
            self.inner.entries().await
        }

        async fn create(&self, name: &str, bytes: &[u8]) -> io::Result<()> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.collisions {
                return Err(io::Error::new(io::ErrorKind::AlreadyExists, "taken"));
            }
            self.inner.create(name, bytes).await
        }
    }

    #[tokio::test]
    async fn save_unique_retries_on_collision() {
        let store = CollidingStore { collisions: 1, calls: AtomicUsize::new(0), inner: MemoryStore::default() };

        let name = save_unique(&store, "a.png", b"data").await.unwrap();

        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.get(&name).unwrap(), b"data");
    }

    #[tokio::test]
    async fn save_unique_gives_up_after_repeated_collisions() {
        let store = CollidingStore {
            collisions: usize::MAX,
            calls: AtomicUsize::new(0),
            inner: MemoryStore::default(),
        };

        let err = save_unique(&store, "a.png", b"data").await.unwrap_err();

        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.to_string().starts_with("Failed to save image file:"));
        assert_eq!(store.calls.load(Ordering::SeqCst), MAX_NAME_ATTEMPTS);
        assert_eq!(store.inner.len(), 0);
    }

    #[test]
    fn size_message_matches_default_limit() {
        assert_eq!(
            too_large(crate::config::MAX_UPLOAD_BYTES).to_string(),
            "File size exceeds 10MB limit."
        );
    }

    #[test]
    fn size_message_never_rounds_to_zero() {
        assert_eq!(too_large(512 * 1024).to_string(), "File size exceeds 512KB limit.");
        assert_eq!(too_large(1000).to_string(), "File size exceeds 1000 bytes limit.");
        assert_eq!(too_large(3 * 1024 * 1024 + 1).to_string(), "File size exceeds 3145729 bytes limit.");
    }
}
