//! The `Git-EVTag-v0-SHA512` digest.
//!
//! Every object reachable from the starting reference is fed to one running
//! SHA-512 as `"<type> <size>\0"` followed by its body, in depth-first
//! traversal order. Tree entries are visited in the order they are stored.
//! Submodules are entered through their own session and keep feeding the
//! same digest, so a submodule's objects appear in the parent's stream
//! exactly as they would in its standalone stream.
//!
//! Tag objects steer the traversal but are not themselves hashed.

use std::path::Path;

use async_trait::async_trait;
use bytes::BytesMut;
use securetag_store::{parse_tree, BatchSession, ObjectSource};
use securetag_types::{ObjectId, ObjectKind};
use sha2::digest::Update;
use sha2::{Digest, Sha512};
use tracing::{debug, trace};

use crate::error::{Breadcrumb, HashError, HashResult};
use crate::format::{DigestEngine, DigestFormat, HashOptions};
use crate::object::{join_path, require_reference, with_deadline, BoxFuture};

/// Traversal position within one repository.
struct Frame<'a> {
    root: &'a Path,
    /// Slash-separated path of the object being visited, empty at the top.
    dir: String,
    session: &'a BatchSession,
}

/// Streaming SHA-512 engine.
pub struct CurrentHasher<S> {
    source: S,
    options: HashOptions,
}

impl<S: ObjectSource> CurrentHasher<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, HashOptions::default())
    }

    pub fn with_options(source: S, options: HashOptions) -> Self {
        Self { source, options }
    }

    /// Hex digest of everything reachable from `reference` in `root`.
    pub async fn compute(&self, root: &Path, reference: &str) -> HashResult<String> {
        let mut digest = Sha512::new();
        self.absorb(root, reference, &mut digest).await?;
        let hex = hex::encode(digest.finalize());
        debug!(root = %root.display(), reference, digest = %hex, "computed EVTag digest");
        Ok(hex)
    }

    /// Feed the object stream reachable from `reference` into `sink`.
    ///
    /// [`compute`](Self::compute) is this with a fresh SHA-512 as the sink.
    pub async fn absorb<D>(&self, root: &Path, reference: &str, sink: &mut D) -> HashResult<()>
    where
        D: Update + Send,
    {
        with_deadline(
            self.options.deadline,
            root,
            self.absorb_repo(root, reference.to_string(), sink),
        )
        .await
    }

    /// One repository: open a session, walk, always release the session.
    fn absorb_repo<'a, D>(
        &'a self,
        root: &'a Path,
        reference: String,
        sink: &'a mut D,
    ) -> BoxFuture<'a, HashResult<()>>
    where
        D: Update + Send,
    {
        Box::pin(async move {
            let session = self.source.open(root).await?;
            let frame = Frame {
                root,
                dir: String::new(),
                session: &session,
            };
            let result = self.visit(&frame, sink, reference).await;
            session.close().await;
            result
        })
    }

    fn visit<'a, D>(
        &'a self,
        frame: &'a Frame<'a>,
        sink: &'a mut D,
        object: String,
    ) -> BoxFuture<'a, HashResult<()>>
    where
        D: Update + Send,
    {
        Box::pin(async move {
            let mut handle = frame.session.query(&object);
            let header = handle.header().await?;
            trace!(object = %header.id, kind = %header.kind, size = header.size, path = %frame.dir, "visit");

            let hashed = header.kind != ObjectKind::Tag;
            if hashed {
                sink.update(format!("{} {}\0", header.kind, header.size).as_bytes());
            }
            let keep = header.kind != ObjectKind::Blob;
            let mut body = BytesMut::new();
            while let Some(chunk) = handle.next_chunk().await? {
                if hashed {
                    sink.update(&chunk);
                }
                if keep {
                    body.extend_from_slice(&chunk);
                }
            }

            match header.kind {
                ObjectKind::Blob => Ok(()),
                ObjectKind::Tree => self.visit_tree(frame, sink, header.id, &body).await,
                ObjectKind::Commit => {
                    if !frame.dir.is_empty() {
                        return Err(HashError::malformed(
                            header.id,
                            format!("commit found inside a tree at `{}`", frame.dir),
                        ));
                    }
                    let tree = require_reference(header.id, &body, "tree")
                        .map_err(|e| e.within(Breadcrumb::Commit(header.id)))?;
                    self.visit(frame, sink, tree.to_hex())
                        .await
                        .map_err(|e| e.within(Breadcrumb::Commit(header.id)))
                }
                ObjectKind::Tag => {
                    let target = require_reference(header.id, &body, "object")
                        .map_err(|e| e.within(Breadcrumb::Tag(header.id)))?;
                    self.visit(frame, sink, target.to_hex())
                        .await
                        .map_err(|e| e.within(Breadcrumb::Tag(header.id)))
                }
            }
        })
    }

    fn visit_tree<'a, D>(
        &'a self,
        frame: &'a Frame<'a>,
        sink: &'a mut D,
        id: ObjectId,
        body: &'a [u8],
    ) -> BoxFuture<'a, HashResult<()>>
    where
        D: Update + Send,
    {
        Box::pin(async move {
            let entries = parse_tree(body).map_err(|e| HashError::malformed(id, e))?;
            for entry in entries {
                let path = join_path(&frame.dir, &entry.name);
                if entry.is_submodule() {
                    let sub_root = frame.root.join(&path);
                    debug!(path = %path, commit = %entry.id, "entering submodule");
                    self.absorb_repo(&sub_root, entry.id.to_hex(), &mut *sink)
                        .await
                        .map_err(|e| e.within(Breadcrumb::Submodule(path)))?;
                } else {
                    let child = Frame {
                        root: frame.root,
                        dir: path,
                        session: frame.session,
                    };
                    self.visit(&child, &mut *sink, entry.id.to_hex())
                        .await
                        .map_err(|e| e.within(Breadcrumb::Entry(child.dir.clone())))?;
                }
            }
            Ok::<(), HashError>(())
        })
    }
}

#[async_trait]
impl<S: ObjectSource> DigestEngine for CurrentHasher<S> {
    fn format(&self) -> DigestFormat {
        DigestFormat::Current
    }

    async fn compute(&self, root: &Path, reference: &str) -> HashResult<String> {
        CurrentHasher::compute(self, root, reference).await
    }
}
