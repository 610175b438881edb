//! The `Git-Secure-Tag-V0` digest.
//!
//! Unlike the streaming format, the legacy digest is computed in two passes.
//! The whole tree is first materialized into a [`CanonicalTree`]: entries
//! sorted by name, blobs reduced to the SHA-512 of their bare content,
//! submodules reduced to their own legacy digest. The listing is then folded
//! into one SHA-512, one `\n`-terminated line per node:
//!
//! ```text
//! write-tree <tree id> <entry count>
//! <mode> <name> <id> <blob digest | submodule digest | child count>
//! ...
//! ```
//!
//! Subtree children follow their parent line depth-first. `<name>` is the
//! entry name cut at its first space (`read me.md` lists as `read`), and
//! entries sort by that cut name; paths and submodule roots still use the
//! full name.

use std::path::Path;

use async_trait::async_trait;
use securetag_store::{parse_tree_sorted, BatchSession, ObjectHandle, ObjectSource, TreeEntry};
use securetag_types::{ObjectId, ObjectKind};
use sha2::{Digest, Sha512};
use tracing::{debug, trace};

use crate::error::{Breadcrumb, HashError, HashResult};
use crate::format::{DigestEngine, DigestFormat, HashOptions};
use crate::object::{join_path, require_reference, with_deadline, BoxFuture};

/// What a tree entry contributes to the listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CanonicalContent {
    /// Hex digest of a blob's content or of a whole submodule.
    Leaf(String),
    /// A subtree's entries, sorted by name.
    Subtree(Vec<CanonicalNode>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalNode {
    pub entry: TreeEntry,
    pub content: CanonicalContent,
}

/// A fully materialized tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CanonicalTree {
    pub tree: ObjectId,
    pub nodes: Vec<CanonicalNode>,
}

impl CanonicalTree {
    /// The listing lines, without terminators.
    pub fn lines(&self) -> Vec<String> {
        let mut out = vec![format!("write-tree {} {}", self.tree, self.nodes.len())];
        push_lines(&self.nodes, &mut out);
        out
    }

    /// Hex SHA-512 of the listing.
    pub fn digest(&self) -> String {
        let mut hasher = Sha512::new();
        for line in self.lines() {
            trace!(target: "securetag::legacy", "{line}");
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

fn push_lines(nodes: &[CanonicalNode], out: &mut Vec<String>) {
    for node in nodes {
        let TreeEntry { mode, id, .. } = &node.entry;
        let name = node.entry.listing_name();
        match &node.content {
            CanonicalContent::Leaf(digest) => out.push(format!("{mode} {name} {id} {digest}")),
            CanonicalContent::Subtree(children) => {
                out.push(format!("{mode} {name} {id} {}", children.len()));
                push_lines(children, out);
            }
        }
    }
}

/// Where a legacy computation starts.
enum Start {
    /// A commit, or a tag chain ending in one.
    Reference(String),
    Tree(ObjectId),
}

/// Materialize-then-fold engine.
pub struct LegacyHasher<S> {
    source: S,
    options: HashOptions,
}

impl<S: ObjectSource> LegacyHasher<S> {
    pub fn new(source: S) -> Self {
        Self::with_options(source, HashOptions::default())
    }

    pub fn with_options(source: S, options: HashOptions) -> Self {
        Self { source, options }
    }

    /// Hex digest of the tree of the commit `reference` resolves to.
    pub async fn compute(&self, root: &Path, reference: &str) -> HashResult<String> {
        let tree = self.canonical(root, reference).await?;
        let digest = tree.digest();
        debug!(root = %root.display(), reference, digest = %digest, "computed legacy digest");
        Ok(digest)
    }

    /// Hex digest of an explicit tree, e.g. the one `git write-tree` made
    /// from the index.
    pub async fn compute_tree(&self, root: &Path, tree: ObjectId) -> HashResult<String> {
        let canonical = with_deadline(
            self.options.deadline,
            root,
            self.materialize_repo(root, Start::Tree(tree)),
        )
        .await?;
        Ok(canonical.digest())
    }

    /// The materialized listing for `reference`.
    pub async fn canonical(&self, root: &Path, reference: &str) -> HashResult<CanonicalTree> {
        with_deadline(
            self.options.deadline,
            root,
            self.materialize_repo(root, Start::Reference(reference.to_string())),
        )
        .await
    }

    fn materialize_repo<'a>(
        &'a self,
        root: &'a Path,
        start: Start,
    ) -> BoxFuture<'a, HashResult<CanonicalTree>> {
        Box::pin(async move {
            let session = self.source.open(root).await?;
            let result = async {
                let tree = match start {
                    Start::Reference(name) => resolve_tree(&session, name).await?,
                    Start::Tree(id) => id,
                };
                let nodes = self.materialize(root, &session, String::new(), tree).await?;
                Ok::<_, HashError>(CanonicalTree { tree, nodes })
            }
            .await;
            session.close().await;
            result
        })
    }

    fn materialize<'a>(
        &'a self,
        root: &'a Path,
        session: &'a BatchSession,
        dir: String,
        tree: ObjectId,
    ) -> BoxFuture<'a, HashResult<Vec<CanonicalNode>>> {
        Box::pin(async move {
            let mut handle = session.query(&tree.to_hex());
            let header = handle.header().await?;
            if header.kind != ObjectKind::Tree {
                return Err(HashError::malformed(
                    header.id,
                    format!("expected a tree, found a {}", header.kind),
                ));
            }
            let body = handle.read_to_end().await?;
            let entries = parse_tree_sorted(&body).map_err(|e| HashError::malformed(tree, e))?;
            trace!(tree = %tree, path = %dir, entries = entries.len(), "materializing");

            // Queue every blob lookup up front; the answers wait in their
            // handles while subtrees and submodules are walked.
            let handles: Vec<Option<ObjectHandle>> = entries
                .iter()
                .map(|e| {
                    (!e.is_subtree() && !e.is_submodule()).then(|| session.query(&e.id.to_hex()))
                })
                .collect();

            let mut nodes = Vec::with_capacity(entries.len());
            for (entry, handle) in entries.into_iter().zip(handles) {
                let path = join_path(&dir, &entry.name);
                let content = match handle {
                    Some(mut handle) => hash_blob(&mut handle)
                        .await
                        .map(CanonicalContent::Leaf)
                        .map_err(|e| e.within(Breadcrumb::Entry(path)))?,
                    None if entry.is_subtree() => {
                        let children = self
                            .materialize(root, session, path.clone(), entry.id)
                            .await
                            .map_err(|e| e.within(Breadcrumb::Entry(path)))?;
                        CanonicalContent::Subtree(children)
                    }
                    None => {
                        let sub_root = root.join(&path);
                        debug!(path = %path, commit = %entry.id, "entering submodule");
                        let canonical = self
                            .materialize_repo(&sub_root, Start::Reference(entry.id.to_hex()))
                            .await
                            .map_err(|e| e.within(Breadcrumb::Submodule(path)))?;
                        CanonicalContent::Leaf(canonical.digest())
                    }
                };
                nodes.push(CanonicalNode { entry, content });
            }
            Ok(nodes)
        })
    }
}

/// Follow tags to a commit and return the commit's tree.
async fn resolve_tree(session: &BatchSession, reference: String) -> HashResult<ObjectId> {
    let mut name = reference;
    let mut passed = Vec::new();
    loop {
        let step = async {
            let mut handle = session.query(&name);
            let header = handle.header().await?;
            let body = handle.read_to_end().await?;
            Ok::<_, HashError>((header, body))
        };
        let (header, body) = step.await.map_err(|e| unwind(e, &passed))?;
        match header.kind {
            ObjectKind::Tag => {
                let target = require_reference(header.id, &body, "object")
                    .map_err(|e| unwind(e.within(Breadcrumb::Tag(header.id)), &passed))?;
                passed.push(Breadcrumb::Tag(header.id));
                name = target.to_hex();
            }
            ObjectKind::Commit => {
                return require_reference(header.id, &body, "tree")
                    .map_err(|e| unwind(e.within(Breadcrumb::Commit(header.id)), &passed));
            }
            other => {
                let err = HashError::malformed(
                    header.id,
                    format!("expected a commit or tag, found a {other}"),
                );
                return Err(unwind(err, &passed));
            }
        }
    }
}

/// Annotate with the tags passed on the way in, innermost first.
fn unwind(err: HashError, passed: &[Breadcrumb]) -> HashError {
    passed
        .iter()
        .rev()
        .fold(err, |err, crumb| err.within(crumb.clone()))
}

/// Hex SHA-512 of a blob's bare content.
async fn hash_blob(handle: &mut ObjectHandle) -> HashResult<String> {
    let mut hasher = Sha512::new();
    while let Some(chunk) = handle.next_chunk().await? {
        hasher.update(&chunk);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[async_trait]
impl<S: ObjectSource> DigestEngine for LegacyHasher<S> {
    fn format(&self) -> DigestFormat {
        DigestFormat::Legacy
    }

    async fn compute(&self, root: &Path, reference: &str) -> HashResult<String> {
        LegacyHasher::compute(self, root, reference).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use securetag_store::{MemoryObjectSource, MemoryRepo, StoreError, SUBMODULE_MODE, TREE_MODE};

    use super::*;
    use crate::current::CurrentHasher;
    use crate::error::HashErrorKind;

    fn sha512_hex(data: &[u8]) -> String {
        hex::encode(Sha512::digest(data))
    }

    fn source_with(repo: MemoryRepo) -> Arc<MemoryObjectSource> {
        let source = Arc::new(MemoryObjectSource::new());
        source.insert("/repo", repo);
        source
    }

    async fn assert_sessions_released(source: &MemoryObjectSource) {
        tokio::time::timeout(Duration::from_secs(5), source.settle())
            .await
            .unwrap();
        assert_eq!(source.opened(), source.closed());
    }

    #[tokio::test]
    async fn listing_is_sorted_and_nested() {
        let mut repo = MemoryRepo::new();
        let readme = repo.blob("hello\n");
        let main = repo.blob("fn main() {}\n");
        let src = repo.tree(&[TreeEntry::new("100644", "main.rs", main)]);
        let tree = repo.tree(&[
            TreeEntry::new(TREE_MODE, "src", src),
            TreeEntry::new("100644", "README", readme),
        ]);
        let commit = repo.commit(tree, &[], "initial");
        repo.set_ref("HEAD", commit);

        let source = source_with(repo);
        let hasher = LegacyHasher::new(source.clone());
        let canonical = hasher.canonical(Path::new("/repo"), "HEAD").await.unwrap();
        assert_eq!(
            canonical.lines(),
            vec![
                format!("write-tree {tree} 2"),
                format!("100644 README {readme} {}", sha512_hex(b"hello\n")),
                format!("40000 src {src} 1"),
                format!("100644 main.rs {main} {}", sha512_hex(b"fn main() {}\n")),
            ]
        );

        let mut listing = canonical.lines().join("\n");
        listing.push('\n');
        let expected = sha512_hex(listing.as_bytes());
        let digest = hasher.compute(Path::new("/repo"), "HEAD").await.unwrap();
        assert_eq!(digest, expected);
        assert_sessions_released(&source).await;
    }

    #[tokio::test]
    async fn reordering_entries_changes_only_current() {
        let mut repo = MemoryRepo::new();
        let x = repo.blob("x");
        let y = repo.blob("y");
        let forward = repo.tree(&[
            TreeEntry::new("100644", "a", x),
            TreeEntry::new("100644", "b", y),
        ]);
        let reverse = repo.tree(&[
            TreeEntry::new("100644", "b", y),
            TreeEntry::new("100644", "a", x),
        ]);
        let c1 = repo.commit(forward, &[], "same");
        let c2 = repo.commit(reverse, &[], "same");
        let source = source_with(repo);

        let legacy = LegacyHasher::new(source.clone());
        let l1 = legacy.canonical(Path::new("/repo"), &c1.to_hex()).await.unwrap();
        let l2 = legacy.canonical(Path::new("/repo"), &c2.to_hex()).await.unwrap();
        // Only the root tree id differs; the sorted listings agree.
        assert_eq!(l1.nodes, l2.nodes);
        assert_ne!(l1.tree, l2.tree);

        let current = CurrentHasher::new(source.clone());
        let d1 = current.compute(Path::new("/repo"), &c1.to_hex()).await.unwrap();
        let d2 = current.compute(Path::new("/repo"), &c2.to_hex()).await.unwrap();
        assert_ne!(d1, d2);
    }

    #[tokio::test]
    async fn blob_change_changes_digest() {
        let digest_of = |content: &'static str| async move {
            let mut repo = MemoryRepo::new();
            let blob = repo.blob(content);
            let tree = repo.tree(&[TreeEntry::new("100644", "f", blob)]);
            let commit = repo.commit(tree, &[], "m");
            repo.set_ref("HEAD", commit);
            LegacyHasher::new(source_with(repo))
                .compute(Path::new("/repo"), "HEAD")
                .await
                .unwrap()
        };
        assert_eq!(digest_of("abc").await, digest_of("abc").await);
        assert_ne!(digest_of("abc").await, digest_of("abd").await);
    }

    #[tokio::test]
    async fn follows_tag_chains() {
        let mut repo = MemoryRepo::new();
        let blob = repo.blob("x");
        let tree = repo.tree(&[TreeEntry::new("100644", "x", blob)]);
        let commit = repo.commit(tree, &[], "m");
        let inner = repo.tag(commit, ObjectKind::Commit, "v1", "one");
        let outer = repo.tag(inner, ObjectKind::Tag, "v1-again", "two");
        repo.set_ref("v1-again", outer);
        let hasher = LegacyHasher::new(source_with(repo));
        let canonical = hasher.canonical(Path::new("/repo"), "v1-again").await.unwrap();
        assert_eq!(canonical.tree, tree);
    }

    #[tokio::test]
    async fn tree_reference_is_malformed() {
        let mut repo = MemoryRepo::new();
        let tree = repo.tree(&[]);
        let tag = repo.tag(tree, ObjectKind::Tree, "t", "tree tag");
        let hasher = LegacyHasher::new(source_with(repo));

        let err = hasher.compute(Path::new("/repo"), &tree.to_hex()).await.unwrap_err();
        assert!(matches!(err.kind(), HashErrorKind::MalformedObject { id, .. } if *id == tree));

        let err = hasher.compute(Path::new("/repo"), &tag.to_hex()).await.unwrap_err();
        assert_eq!(err.trail(), &[Breadcrumb::Tag(tag)]);
    }

    #[tokio::test]
    async fn compute_tree_skips_resolution() {
        let mut repo = MemoryRepo::new();
        let blob = repo.blob("x");
        let tree = repo.tree(&[TreeEntry::new("100644", "x", blob)]);
        let commit = repo.commit(tree, &[], "m");
        let hasher = LegacyHasher::new(source_with(repo));
        assert_eq!(
            hasher.compute_tree(Path::new("/repo"), tree).await.unwrap(),
            hasher.compute(Path::new("/repo"), &commit.to_hex()).await.unwrap()
        );
    }

    #[tokio::test]
    async fn submodule_contributes_its_own_digest() {
        let mut sub = MemoryRepo::new();
        let lib = sub.blob("lib\n");
        let sub_tree = sub.tree(&[TreeEntry::new("100644", "lib.rs", lib)]);
        let sub_commit = sub.commit(sub_tree, &[], "sub");

        let mut parent = MemoryRepo::new();
        let vendor = parent.tree(&[TreeEntry::new(SUBMODULE_MODE, "sub", sub_commit)]);
        let tree = parent.tree(&[TreeEntry::new(TREE_MODE, "vendor", vendor)]);
        let commit = parent.commit(tree, &[], "parent");
        parent.set_ref("HEAD", commit);

        let source = Arc::new(MemoryObjectSource::new());
        source.insert("/repo", parent);
        source.insert("/repo/vendor/sub", sub);
        let hasher = LegacyHasher::new(source.clone());

        let standalone = hasher
            .compute(Path::new("/repo/vendor/sub"), &sub_commit.to_hex())
            .await
            .unwrap();
        let canonical = hasher.canonical(Path::new("/repo"), "HEAD").await.unwrap();
        assert_eq!(
            canonical.lines()[2],
            format!("160000 sub {sub_commit} {standalone}")
        );
        assert_sessions_released(&source).await;
    }

    #[tokio::test]
    async fn failures_release_sessions_and_carry_trail() {
        let mut sub = MemoryRepo::new();
        let lib = sub.blob("lib\n");
        let sub_tree = sub.tree(&[TreeEntry::new("100644", "lib.rs", lib)]);
        let sub_commit = sub.commit(sub_tree, &[], "sub");
        sub.remove(&lib);

        let mut parent = MemoryRepo::new();
        let tree = parent.tree(&[TreeEntry::new(SUBMODULE_MODE, "sub", sub_commit)]);
        let commit = parent.commit(tree, &[], "parent");
        parent.set_ref("HEAD", commit);

        let source = Arc::new(MemoryObjectSource::new());
        source.insert("/repo", parent);
        source.insert("/repo/sub", sub);
        let hasher = LegacyHasher::new(source.clone());

        let err = hasher.compute(Path::new("/repo"), "HEAD").await.unwrap_err();
        assert!(matches!(err.store_error(), Some(StoreError::ObjectMissing(_))));
        assert_eq!(
            err.trail(),
            &[
                Breadcrumb::Entry("lib.rs".into()),
                Breadcrumb::Submodule("sub".into()),
            ]
        );
        assert_sessions_released(&source).await;
        assert_eq!(source.opened(), 2);
    }

    #[tokio::test]
    async fn generous_deadline_allows_completion() {
        let mut repo = MemoryRepo::new();
        let blob = repo.blob("x");
        let tree = repo.tree(&[TreeEntry::new("100644", "x", blob)]);
        let commit = repo.commit(tree, &[], "m");
        repo.set_ref("HEAD", commit);
        let source = source_with(repo);
        let hasher = LegacyHasher::with_options(
            source.clone(),
            HashOptions::with_deadline(Duration::from_secs(30)),
        );
        assert!(hasher.compute(Path::new("/repo"), "HEAD").await.is_ok());
        assert_sessions_released(&source).await;
    }

    #[tokio::test]
    async fn deadline_expires_on_unresponsive_store() {
        let mut repo = MemoryRepo::new();
        let blob = repo.blob("x");
        let tree = repo.tree(&[TreeEntry::new("100644", "x", blob)]);
        let commit = repo.commit(tree, &[], "m");
        repo.set_ref("HEAD", commit);
        repo.stall_on(blob);
        let source = source_with(repo);
        let hasher = LegacyHasher::with_options(
            source.clone(),
            HashOptions::with_deadline(Duration::from_millis(50)),
        );

        let err = hasher.compute(Path::new("/repo"), "HEAD").await.unwrap_err();
        assert!(matches!(
            err.store_error(),
            Some(StoreError::SessionExited { status, .. }) if status.contains("deadline")
        ));
        assert_sessions_released(&source).await;
        assert_eq!(source.opened(), 1);
    }

    #[tokio::test]
    async fn spaced_names_list_up_to_first_space() {
        let mut repo = MemoryRepo::new();
        let spaced = repo.blob("spaced\n");
        let plain = repo.blob("plain\n");
        let tree = repo.tree(&[
            TreeEntry::new("100644", "read me.md", spaced),
            TreeEntry::new("100644", "read", plain),
            TreeEntry::new("100644", "re", plain),
        ]);
        let commit = repo.commit(tree, &[], "m");
        repo.set_ref("HEAD", commit);

        let hasher = LegacyHasher::new(source_with(repo));
        let canonical = hasher.canonical(Path::new("/repo"), "HEAD").await.unwrap();
        assert_eq!(
            canonical.lines(),
            vec![
                format!("write-tree {tree} 3"),
                format!("100644 re {plain} {}", sha512_hex(b"plain\n")),
                format!("100644 read {spaced} {}", sha512_hex(b"spaced\n")),
                format!("100644 read {plain} {}", sha512_hex(b"plain\n")),
            ]
        );
        // The full name still addresses the entry.
        assert_eq!(canonical.nodes[1].entry.name, "read me.md");
    }

    #[test]
    fn listing_digest_known_answer() {
        let id = |byte: u8| ObjectId::from_raw([byte; 20]);
        let canonical = CanonicalTree {
            tree: id(0x11),
            nodes: vec![
                CanonicalNode {
                    entry: TreeEntry::new(TREE_MODE, "dir", id(0x33)),
                    content: CanonicalContent::Subtree(vec![CanonicalNode {
                        entry: TreeEntry::new("100644", "x", id(0x44)),
                        content: CanonicalContent::Leaf(sha512_hex(b"x\n")),
                    }]),
                },
                CanonicalNode {
                    entry: TreeEntry::new("100644", "read me.md", id(0x22)),
                    content: CanonicalContent::Leaf(sha512_hex(b"spaced\n")),
                },
            ],
        };
        assert_eq!(
            canonical.digest(),
            "6db4de52108ff649a762037c70420a1fb3c7aba24d9e5bdf67a315c281c009fb\
             e45d56739374b12de02a1f666e8b2376b3e12fc4adbeb1e7dd4015f7a6f3d9ed"
        );
    }
}
