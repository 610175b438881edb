//! Pipelined `git cat-file --batch` sessions.
//!
//! A [`BatchSession`] owns one long-lived object store connection. Queries are
//! written immediately and answered strictly in request order, so any number
//! of them may be in flight. A reader task decodes the response stream with
//! [`ObjectStreamReader`] and routes each record to the head of the pending
//! queue; a writer task forwards request lines.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};
use securetag_types::{is_object_hex, ObjectId, ObjectKind};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::GitConfig;
use crate::error::{StoreError, StoreResult};
use crate::reader::{ObjectStreamReader, StreamEvent};

const READ_CHUNK: usize = 64 * 1024;

/// Type and size of a resolved object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ObjectHeader {
    pub id: ObjectId,
    pub kind: ObjectKind,
    pub size: u64,
}

#[derive(Debug)]
enum Delivery {
    Header(ObjectHeader),
    Chunk(Bytes),
    End,
}

type DeliveryTx = mpsc::UnboundedSender<StoreResult<Delivery>>;

struct Pending {
    object: String,
    tx: DeliveryTx,
}

#[derive(Default)]
struct Queue {
    pending: VecDeque<Pending>,
    /// Set once the session can no longer answer; later queries fail with it.
    failure: Option<StoreError>,
}

struct Shared {
    root: PathBuf,
    queue: Mutex<Queue>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, Queue> {
        self.queue.lock().expect("session queue lock poisoned")
    }

    /// Route one decoded event to the query at the head of the queue.
    fn dispatch(&self, event: StreamEvent) -> StoreResult<()> {
        let mut queue = self.lock();
        match event {
            StreamEvent::Header { id, kind, size } => {
                let head = queue.pending.front().ok_or_else(|| {
                    StoreError::ProtocolDesync(format!("unexpected reply for {id}"))
                })?;
                if is_object_hex(head.object.as_bytes()) && head.object != id.to_hex() {
                    return Err(StoreError::UnexpectedReply {
                        requested: head.object.clone(),
                        received: id,
                    });
                }
                let _ = head.tx.send(Ok(Delivery::Header(ObjectHeader { id, kind, size })));
            }
            StreamEvent::Body(chunk) => {
                if let Some(head) = queue.pending.front() {
                    let _ = head.tx.send(Ok(Delivery::Chunk(chunk)));
                }
            }
            StreamEvent::End => {
                if let Some(head) = queue.pending.pop_front() {
                    let _ = head.tx.send(Ok(Delivery::End));
                }
            }
            StreamEvent::Missing { object } => {
                let head = pop_matching(&mut queue, &object)?;
                let _ = head.tx.send(Err(StoreError::ObjectMissing(object)));
            }
            StreamEvent::Ambiguous { object } => {
                let head = pop_matching(&mut queue, &object)?;
                let _ = head.tx.send(Err(StoreError::ObjectAmbiguous(object)));
            }
        }
        Ok(())
    }

    /// Fail every pending query and poison the session.
    fn fail_all(&self, err: StoreError) {
        let mut queue = self.lock();
        if queue.failure.is_none() {
            queue.failure = Some(err.clone());
        }
        let failed = queue.pending.len();
        for pending in queue.pending.drain(..) {
            let _ = pending.tx.send(Err(err.clone()));
        }
        if failed > 0 {
            debug!(root = %self.root.display(), failed, error = %err, "failed pending queries");
        }
    }
}

fn pop_matching(queue: &mut Queue, object: &str) -> StoreResult<Pending> {
    if let Some(head) = queue.pending.front() {
        if head.object != object {
            return Err(StoreError::ProtocolDesync(format!(
                "reply for {object} while waiting for {}",
                head.object
            )));
        }
    }
    queue
        .pending
        .pop_front()
        .ok_or_else(|| StoreError::ProtocolDesync(format!("unexpected reply for {object}")))
}

/// One object store connection rooted at a repository path.
///
/// Dropping a session releases it exactly like [`BatchSession::close`]: the
/// subprocess is killed and all pending queries fail with
/// [`StoreError::SessionClosed`].
pub struct BatchSession {
    shared: Arc<Shared>,
    requests: Option<mpsc::UnboundedSender<String>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    closed: bool,
}

impl BatchSession {
    /// Start `git cat-file --batch` in `root`.
    pub fn spawn(config: &GitConfig, root: &Path) -> StoreResult<Self> {
        let mut cmd = config.command(root);
        cmd.args(["cat-file", "--batch"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());

        let spawn_err = |source| StoreError::Spawn {
            program: config.program_name(),
            root: root.to_path_buf(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stdin not captured")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| spawn_err(std::io::Error::other("stdout not captured")))?;

        debug!(root = %root.display(), pid = ?child.id(), "spawned cat-file session");
        Ok(Self::start(root, stdout, stdin, Some(child)))
    }

    /// Run the batch protocol over an arbitrary byte stream pair.
    pub fn from_io<R, W>(root: &Path, reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::start(root, reader, writer, None)
    }

    fn start<R, W>(root: &Path, reader: R, writer: W, child: Option<Child>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let shared = Arc::new(Shared {
            root: root.to_path_buf(),
            queue: Mutex::new(Queue::default()),
        });
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = tokio::spawn(read_loop(shared.clone(), reader, child));
        let writer = tokio::spawn(write_loop(shared.clone(), writer, rx));
        Self {
            shared,
            requests: Some(tx),
            reader,
            writer,
            closed: false,
        }
    }

    /// Repository root this session reads from.
    pub fn root(&self) -> &Path {
        &self.shared.root
    }

    /// Queue a lookup. Never blocks; the answer arrives through the handle.
    ///
    /// `object` may be any name `cat-file` resolves: a full id, a ref, or a
    /// `rev:path` expression. Repeated names are looked up again.
    pub fn query(&self, object: &str) -> ObjectHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut queue = self.shared.lock();
        if let Some(err) = &queue.failure {
            let _ = tx.send(Err(err.clone()));
        } else {
            let sent = self
                .requests
                .as_ref()
                .is_some_and(|requests| requests.send(format!("{object}\n")).is_ok());
            if sent {
                queue.pending.push_back(Pending {
                    object: object.to_string(),
                    tx,
                });
            } else {
                let _ = tx.send(Err(StoreError::SessionClosed(self.shared.root.clone())));
            }
        }
        ObjectHandle {
            object: object.to_string(),
            root: self.shared.root.clone(),
            rx,
            header: None,
            finished: false,
        }
    }

    /// Number of queries still waiting for their answer to complete.
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Terminate the session and wait for its reader to release the process.
    pub async fn close(mut self) {
        self.shutdown();
        let _ = (&mut self.reader).await;
        let _ = (&mut self.writer).await;
        debug!(root = %self.shared.root.display(), "closed cat-file session");
    }

    fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.shared
            .fail_all(StoreError::SessionClosed(self.shared.root.clone()));
        self.requests.take();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for BatchSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for BatchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchSession")
            .field("root", &self.shared.root)
            .field("closed", &self.closed)
            .finish()
    }
}

async fn read_loop<R>(shared: Arc<Shared>, mut stdout: R, mut child: Option<Child>)
where
    R: AsyncRead + Unpin,
{
    let mut decoder = ObjectStreamReader::new();
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    let mut events = Vec::new();

    let failure = loop {
        buf.reserve(READ_CHUNK);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => break None,
            Ok(_) => {
                if let Err(err) = decoder.feed(buf.split().freeze(), &mut events) {
                    break Some(err);
                }
                if let Err(err) = events.drain(..).try_for_each(|event| shared.dispatch(event)) {
                    break Some(err);
                }
            }
            Err(err) => break Some(StoreError::Io(err)),
        }
    };

    let err = match failure {
        Some(err) => {
            warn!(root = %shared.root.display(), error = %err, "object stream desynchronized");
            err
        }
        None => {
            let status = match child.as_mut() {
                Some(child) => match child.wait().await {
                    Ok(status) => status.to_string(),
                    Err(err) => err.to_string(),
                },
                None => "stream closed".to_string(),
            };
            if let Some((id, remaining)) = decoder.pending_body() {
                warn!(
                    root = %shared.root.display(), %id, remaining, %status,
                    "stream ended inside an object body"
                );
                StoreError::ProtocolDesync(format!(
                    "stream ended with {remaining} body bytes outstanding for {id}"
                ))
            } else if !decoder.is_idle() {
                warn!(root = %shared.root.display(), %status, "stream ended inside a record");
                StoreError::ProtocolDesync(
                    "stream ended before the current record was complete".into(),
                )
            } else {
                StoreError::SessionExited {
                    root: shared.root.clone(),
                    status,
                }
            }
        }
    };
    shared.fail_all(err);
}

async fn write_loop<W>(shared: Arc<Shared>, mut stdin: W, mut requests: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(line) = requests.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        // A dead process is reported by the reader once it sees EOF.
        if let Err(err) = written {
            debug!(root = %shared.root.display(), error = %err, "request pipe closed");
            return;
        }
    }
    let _ = stdin.shutdown().await;
}

/// The pending answer to one [`BatchSession::query`].
///
/// Call [`header`](Self::header) first, then drain the body with
/// [`next_chunk`](Self::next_chunk) or [`read_to_end`](Self::read_to_end).
#[derive(Debug)]
pub struct ObjectHandle {
    object: String,
    root: PathBuf,
    rx: mpsc::UnboundedReceiver<StoreResult<Delivery>>,
    header: Option<ObjectHeader>,
    finished: bool,
}

impl ObjectHandle {
    /// The name this handle was queried with.
    pub fn object(&self) -> &str {
        &self.object
    }

    async fn recv(&mut self) -> StoreResult<Delivery> {
        match self.rx.recv().await {
            Some(delivery) => delivery,
            None => Err(StoreError::SessionClosed(self.root.clone())),
        }
    }

    /// Wait for the object's header. Fails if the object is missing.
    pub async fn header(&mut self) -> StoreResult<ObjectHeader> {
        if let Some(header) = self.header {
            return Ok(header);
        }
        match self.recv().await? {
            Delivery::Header(header) => {
                self.header = Some(header);
                Ok(header)
            }
            other => Err(StoreError::ProtocolDesync(format!(
                "expected header for {}, got {other:?}",
                self.object
            ))),
        }
    }

    /// Next body chunk, or `None` once the body is complete.
    pub async fn next_chunk(&mut self) -> StoreResult<Option<Bytes>> {
        self.header().await?;
        if self.finished {
            return Ok(None);
        }
        match self.recv().await? {
            Delivery::Chunk(chunk) => Ok(Some(chunk)),
            Delivery::End => {
                self.finished = true;
                Ok(None)
            }
            Delivery::Header(header) => Err(StoreError::ProtocolDesync(format!(
                "second header {} for {}",
                header.id, self.object
            ))),
        }
    }

    /// Collect the remaining body into one buffer.
    pub async fn read_to_end(&mut self) -> StoreResult<Bytes> {
        let mut body = BytesMut::new();
        while let Some(chunk) = self.next_chunk().await? {
            body.extend_from_slice(&chunk);
        }
        Ok(body.freeze())
    }
}
