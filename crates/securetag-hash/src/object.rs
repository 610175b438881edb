//! Helpers shared by both engines for reading commit and tag bodies.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use securetag_store::StoreError;
use securetag_types::{is_object_hex, ObjectId};

use crate::error::{HashError, HashResult};

/// Boxed future for the recursive traversals.
pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Find the first line of `body` that reads `"<key> <40 hex>"`.
///
/// Lines may be separated by `\n` or `\r`; anything after the id is ignored.
pub fn find_reference(body: &[u8], key: &str) -> Option<ObjectId> {
    body.split(|&b| b == b'\n' || b == b'\r').find_map(|line| {
        let rest = line.strip_prefix(key.as_bytes())?.strip_prefix(b" ")?;
        let hex = rest.get(..40)?;
        if !is_object_hex(hex) {
            return None;
        }
        std::str::from_utf8(hex).ok()?.parse().ok()
    })
}

/// Like [`find_reference`], failing with a malformed-object error.
pub(crate) fn require_reference(id: ObjectId, body: &[u8], key: &str) -> HashResult<ObjectId> {
    find_reference(body, key)
        .ok_or_else(|| HashError::malformed(id, format!("no `{key}` line referencing an object")))
}

/// Join a tree entry name onto a slash-separated directory path.
pub(crate) fn join_path(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{dir}/{name}")
    }
}

/// Run `fut` under an optional deadline.
///
/// An expired deadline is reported the way a vanished subprocess is.
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    root: &std::path::Path,
    fut: F,
) -> HashResult<T>
where
    F: Future<Output = HashResult<T>>,
{
    let Some(limit) = deadline else {
        return fut.await;
    };
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(root = %root.display(), ?limit, "digest computation timed out");
            Err(StoreError::SessionExited {
                root: root.to_path_buf(),
                status: format!("deadline of {limit:?} exceeded"),
            }
            .into())
        }
    }
}
