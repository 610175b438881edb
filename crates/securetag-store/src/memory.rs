//! In-memory object stores speaking the batch protocol.
//!
//! Intended for tests and embedding. A [`MemoryObjectSource`] maps repository
//! roots to [`MemoryRepo`]s and serves each session over an in-process duplex
//! pipe with a deliberately small buffer, so responses reach the
//! [`BatchSession`] reader in arbitrary fragments just as they would from a
//! real subprocess.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use securetag_types::{ObjectId, ObjectKind, OBJECT_ID_LEN};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::session::BatchSession;
use crate::source::ObjectSource;
use crate::tree::{encode_tree, TreeEntry};

/// Duplex buffer size used for served sessions.
const PIPE_CAPACITY: usize = 61;

/// Author/committer line used by [`MemoryRepo::commit`].
const SIGNATURE: &str = "John Doe <john@doe.org> 1700000000 +0000";

/// A set of objects and named references.
#[derive(Clone, Debug, Default)]
pub struct MemoryRepo {
    objects: HashMap<ObjectId, (ObjectKind, Vec<u8>)>,
    refs: HashMap<String, ObjectId>,
    corrupt: HashSet<ObjectId>,
    crash_on: HashSet<ObjectId>,
    stall_on: HashSet<ObjectId>,
}

/// What the server does with one request line.
enum Reply {
    Send(Vec<u8>),
    HangUp,
    Stall,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object under a synthetic content address.
    ///
    /// Ids are the first 20 bytes of the BLAKE3 hash of git's object framing,
    /// so equal content maps to equal ids just as in a real repository.
    pub fn insert(&mut self, kind: ObjectKind, body: impl Into<Vec<u8>>) -> ObjectId {
        let body = body.into();
        let mut hasher = blake3::Hasher::new();
        hasher.update(format!("{kind} {}\0", body.len()).as_bytes());
        hasher.update(&body);
        let mut raw = [0u8; OBJECT_ID_LEN];
        raw.copy_from_slice(&hasher.finalize().as_bytes()[..OBJECT_ID_LEN]);
        let id = ObjectId::from_raw(raw);
        self.objects.insert(id, (kind, body));
        id
    }

    pub fn blob(&mut self, data: impl Into<Vec<u8>>) -> ObjectId {
        self.insert(ObjectKind::Blob, data)
    }

    /// Store a tree with entries in exactly the given order.
    pub fn tree(&mut self, entries: &[TreeEntry]) -> ObjectId {
        self.insert(ObjectKind::Tree, encode_tree(entries))
    }

    pub fn commit(&mut self, tree: ObjectId, parents: &[ObjectId], message: &str) -> ObjectId {
        let mut body = format!("tree {tree}\n");
        for parent in parents {
            body.push_str(&format!("parent {parent}\n"));
        }
        body.push_str(&format!("author {SIGNATURE}\ncommitter {SIGNATURE}\n\n{message}\n"));
        self.insert(ObjectKind::Commit, body)
    }

    pub fn tag(&mut self, object: ObjectId, kind: ObjectKind, name: &str, message: &str) -> ObjectId {
        let body = format!(
            "object {object}\ntype {kind}\ntag {name}\ntagger {SIGNATURE}\n\n{message}\n"
        );
        self.insert(ObjectKind::Tag, body)
    }

    /// Point a name (`HEAD`, a tag name, ...) at an object.
    pub fn set_ref(&mut self, name: impl Into<String>, id: ObjectId) {
        self.refs.insert(name.into(), id);
    }

    /// Drop an object so lookups report it missing.
    pub fn remove(&mut self, id: &ObjectId) -> bool {
        self.objects.remove(id).is_some()
    }

    /// Answer lookups of `id` with a malformed header line.
    pub fn corrupt(&mut self, id: ObjectId) {
        self.corrupt.insert(id);
    }

    /// Close the session's stream when `id` is requested.
    pub fn crash_on(&mut self, id: ObjectId) {
        self.crash_on.insert(id);
    }

    /// Stop answering once `id` is requested, keeping the stream open.
    pub fn stall_on(&mut self, id: ObjectId) {
        self.stall_on.insert(id);
    }

    pub fn get(&self, id: &ObjectId) -> Option<(ObjectKind, &[u8])> {
        self.objects.get(id).map(|(kind, body)| (*kind, body.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn resolve(&self, name: &str) -> Option<ObjectId> {
        self.refs
            .get(name)
            .copied()
            .or_else(|| ObjectId::from_hex(name).ok())
    }

    /// The batch protocol reply to one request line.
    fn respond(&self, name: &str) -> Reply {
        let Some(id) = self.resolve(name) else {
            return Reply::Send(format!("{name} missing\n").into_bytes());
        };
        if self.crash_on.contains(&id) {
            return Reply::HangUp;
        }
        if self.stall_on.contains(&id) {
            return Reply::Stall;
        }
        if self.corrupt.contains(&id) {
            return Reply::Send(format!("{id} garbled\n").into_bytes());
        }
        match self.objects.get(&id) {
            Some((kind, body)) => {
                let mut out = format!("{id} {kind} {}\n", body.len()).into_bytes();
                out.extend_from_slice(body);
                out.push(b'\n');
                Reply::Send(out)
            }
            None => Reply::Send(format!("{name} missing\n").into_bytes()),
        }
    }
}

/// Object source serving [`MemoryRepo`]s, with session accounting.
#[derive(Default)]
pub struct MemoryObjectSource {
    repos: RwLock<HashMap<PathBuf, Arc<MemoryRepo>>>,
    opened: AtomicUsize,
    closed: Arc<AtomicUsize>,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

impl MemoryObjectSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `repo` as the repository rooted at `root`.
    pub fn insert(&self, root: impl Into<PathBuf>, repo: MemoryRepo) {
        self.repos
            .write()
            .expect("repos lock poisoned")
            .insert(root.into(), Arc::new(repo));
    }

    /// Sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions whose client side has hung up.
    ///
    /// Call [`settle`](Self::settle) first for an exact count.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wait until every served session has observed its client hanging up.
    pub async fn settle(&self) {
        let servers: Vec<_> = self
            .servers
            .lock()
            .expect("servers lock poisoned")
            .drain(..)
            .collect();
        for server in servers {
            let _ = server.await;
        }
    }
}

#[async_trait]
impl ObjectSource for MemoryObjectSource {
    async fn open(&self, root: &Path) -> StoreResult<BatchSession> {
        let repo = self
            .repos
            .read()
            .expect("repos lock poisoned")
            .get(root)
            .cloned()
            .ok_or_else(|| StoreError::SessionExited {
                root: root.to_path_buf(),
                status: "not a git repository".into(),
            })?;

        let (client, server) = tokio::io::duplex(PIPE_CAPACITY);
        let (client_rd, client_wr) = tokio::io::split(client);
        let closed = self.closed.clone();
        let handle = tokio::spawn(serve(repo, server, closed));
        self.servers.lock().expect("servers lock poisoned").push(handle);
        self.opened.fetch_add(1, Ordering::SeqCst);
        debug!(root = %root.display(), "opened in-memory session");
        Ok(BatchSession::from_io(root, client_rd, client_wr))
    }
}

async fn serve(repo: Arc<MemoryRepo>, stream: tokio::io::DuplexStream, closed: Arc<AtomicUsize>) {
    let (rd, mut wr) = tokio::io::split(stream);
    let mut lines = BufReader::new(rd).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => match repo.respond(&line) {
                Reply::Send(reply) => {
                    if wr.write_all(&reply).await.is_err() {
                        break;
                    }
                }
                Reply::HangUp => {
                    // Hang up, then wait for the client to close its side.
                    let _ = wr.shutdown().await;
                    while let Ok(Some(_)) = lines.next_line().await {}
                    break;
                }
                Reply::Stall => {
                    while let Ok(Some(_)) = lines.next_line().await {}
                    break;
                }
            },
            _ => break,
        }
    }
    closed.fetch_add(1, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TREE_MODE;

    #[tokio::test]
    async fn serves_objects_through_batch_session() {
        let mut repo = MemoryRepo::new();
        let blob = repo.blob("content that is longer than the pipe buffer, twice over: 0123456789");
        let tree = repo.tree(&[TreeEntry::new("100644", "file", blob)]);
        repo.set_ref("HEAD", tree);

        let source = MemoryObjectSource::new();
        source.insert("/repo", repo);
        let session = source.open(Path::new("/repo")).await.unwrap();

        let mut head = session.query("HEAD");
        let header = head.header().await.unwrap();
        assert_eq!(header.id, tree);
        assert_eq!(header.kind, ObjectKind::Tree);
        head.read_to_end().await.unwrap();

        let mut body = session.query(&blob.to_hex());
        let data = body.read_to_end().await.unwrap();
        assert!(data.starts_with(b"content that"));
        session.close().await;

        source.settle().await;
        assert_eq!(source.opened(), 1);
        assert_eq!(source.closed(), 1);
    }

    #[tokio::test]
    async fn equal_content_equal_ids() {
        let mut repo = MemoryRepo::new();
        let a = repo.blob("same");
        let b = repo.blob("same");
        let t = repo.insert(ObjectKind::Tree, "same");
        assert_eq!(a, b);
        assert_ne!(a, t);
        assert_eq!(repo.len(), 2);
    }

    #[tokio::test]
    async fn removed_and_corrupt_objects() {
        let mut repo = MemoryRepo::new();
        let gone = repo.blob("gone");
        let bad = repo.tree(&[TreeEntry::new(TREE_MODE, "x", gone)]);
        repo.remove(&gone);
        repo.corrupt(bad);

        let source = MemoryObjectSource::new();
        source.insert("/repo", repo);
        let session = source.open(Path::new("/repo")).await.unwrap();
        let mut missing = session.query(&gone.to_hex());
        assert!(matches!(missing.header().await, Err(StoreError::ObjectMissing(_))));
        let mut garbled = session.query(&bad.to_hex());
        assert!(matches!(garbled.header().await, Err(StoreError::ProtocolDesync(_))));
    }

    #[tokio::test]
    async fn stalled_lookup_never_answers() {
        let mut repo = MemoryRepo::new();
        let slow = repo.blob("slow");
        repo.stall_on(slow);

        let source = MemoryObjectSource::new();
        source.insert("/repo", repo);
        let session = source.open(Path::new("/repo")).await.unwrap();
        let mut handle = session.query(&slow.to_hex());
        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(50), handle.header()).await;
        assert!(waited.is_err());

        drop(handle);
        session.close().await;
        source.settle().await;
        assert_eq!(source.closed(), 1);
    }

    #[tokio::test]
    async fn unknown_root_fails_to_open() {
        let source = MemoryObjectSource::new();
        let err = source.open(Path::new("/nowhere")).await.unwrap_err();
        assert!(matches!(err, StoreError::SessionExited { .. }));
        assert_eq!(source.opened(), 0);
    }
}
