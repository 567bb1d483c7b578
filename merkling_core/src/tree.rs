//! Metadata tree: the ingested hierarchy and its JSON form.

use crate::error::{Error, Result};
use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, warn};

/// Kind of a metadata node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    /// A directory.
    Dir,
    /// A regular file whose content lives in a pool.
    File,
    /// A symbolic link.
    Symlink,
}

/// A node in the metadata tree.
///
/// For `File` nodes `value` is the content identifier naming the object
/// in a pool; for `Symlink` nodes it is the link target; `Dir` nodes
/// leave it empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Entry name. The ingestion root has the empty name.
    #[serde(default)]
    pub name: String,

    /// Kind of entry.
    pub kind: NodeKind,

    /// Content identifier (file), link target (symlink), or empty (dir).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub value: String,

    /// Content is stored compressed under its identifier in the zpool.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub zstd: bool,

    /// Byte offset of this file inside its bundle object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,

    /// Byte length of this file inside its bundle object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    /// Child nodes, sorted by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Node>,
}

impl Node {
    /// Create a directory node with no children yet.
    pub fn dir(name: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::Dir,
            value: String::new(),
            zstd: false,
            offset: None,
            size: None,
            children: Vec::new(),
        }
    }

    /// Create a file node carrying its content identifier.
    pub fn file(name: impl Into<String>, value: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::File,
            value: value.into(),
            zstd: false,
            offset: None,
            size: None,
            children: Vec::new(),
        }
    }

    /// Create a symlink node carrying its target.
    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Node {
            name: name.into(),
            kind: NodeKind::Symlink,
            value: target.into(),
            zstd: false,
            offset: None,
            size: None,
            children: Vec::new(),
        }
    }
}

/// The metadata tree for one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    /// Root of the ingested hierarchy.
    pub root: Node,
}

impl Tree {
    /// Walk `root` and build the tree, invoking `stash` once per regular
    /// file to obtain its content identifier.
    ///
    /// Children are recorded sorted by name. Symlinks become nodes
    /// carrying their target; special files (sockets, fifos, devices)
    /// are skipped. A `stash` error aborts the build.
    pub fn build<F>(root: &Path, mut stash: F) -> Result<Self>
    where
        F: FnMut(&Path) -> Result<Hash>,
    {
        let metadata = fs::metadata(root).map_err(|source| Error::unreadable(root, source))?;

        let root_node = if metadata.is_file() {
            let id = stash(root)?;
            Node::file(String::new(), id.to_hex())
        } else if metadata.is_dir() {
            build_dir(root, String::new(), &mut stash)?
        } else {
            return Err(Error::invalid_entry(format!(
                "Unsupported root type: {}",
                root.display()
            )));
        };

        Ok(Tree { root: root_node })
    }

    /// Visit every value-carrying node (files, symlinks), depth-first in
    /// name order.
    ///
    /// Duplicate identifiers may be visited more than once; selection
    /// callbacks are idempotent per identifier, so the second pass still
    /// does its work once per distinct content object.
    pub fn walk<F>(&mut self, mut f: F)
    where
        F: FnMut(&mut Node),
    {
        walk_node(&mut self.root, &mut f);
    }

    /// Fold small files into concatenated bundle objects staged in
    /// `tpool`, after the tree is built and before selection.
    ///
    /// File nodes whose staged object is smaller than `bsize` are
    /// grouped in walk order into bundles of at most `asize` bytes; each
    /// bundle is written into `tpool` under its own content identifier
    /// and the member nodes are rewritten to reference it with their
    /// byte range. Groups of fewer than two members are left unbundled.
    /// Every failure skips the affected group: bundling is an
    /// optimization, never a correctness requirement.
    ///
    /// Returns the number of bundles created.
    pub fn bundle(&mut self, bsize: u64, asize: u64, tpool: &Path) -> usize {
        if bsize == 0 {
            return 0;
        }

        let mut files = Vec::new();
        collect_files(&mut self.root, &mut files);

        // Group candidates in walk order, starting a new bundle when the
        // aggregate cap would be exceeded. A second occurrence of the
        // same identifier stays standalone.
        let mut seen = HashSet::new();
        let mut groups: Vec<Vec<(&mut Node, u64)>> = Vec::new();
        let mut current: Vec<(&mut Node, u64)> = Vec::new();
        let mut current_size = 0u64;

        for node in files {
            if Hash::from_hex(&node.value).is_err() || node.offset.is_some() {
                continue;
            }
            let len = match fs::metadata(tpool.join(&node.value)) {
                Ok(meta) => meta.len(),
                Err(_) => continue, // not staged
            };
            if len >= bsize || !seen.insert(node.value.clone()) {
                continue;
            }
            if current_size + len > asize && !current.is_empty() {
                groups.push(std::mem::take(&mut current));
                current_size = 0;
            }
            current_size += len;
            current.push((node, len));
        }
        if !current.is_empty() {
            groups.push(current);
        }

        let mut bundles = 0;
        for group in groups {
            if group.len() < 2 {
                continue; // a one-member bundle saves nothing
            }
            if write_bundle(group, tpool) {
                bundles += 1;
            }
        }
        bundles
    }

    /// Serialize the tree to `path` as JSON, written atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_vec_pretty(self).map_err(|e| Error::invalid_meta(e.to_string()))?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent)?;
                parent
            }
            _ => Path::new("."),
        };

        // Write atomically using tempfile
        let mut temp_file = tempfile::NamedTempFile::new_in(dir)?;
        temp_file.write_all(&json)?;
        temp_file.flush()?;
        temp_file.persist(path)?;

        Ok(())
    }

    /// Deserialize a tree from a JSON metadata file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&content).map_err(|e| Error::invalid_meta(e.to_string()))
    }
}

/// Build a directory node, one level at a time; recursion handles the
/// subtrees.
fn build_dir<F>(path: &Path, name: String, stash: &mut F) -> Result<Node>
where
    F: FnMut(&Path) -> Result<Hash>,
{
    let mut node = Node::dir(name);

    // Standard filters are off: an ingestion walk visits hidden files
    // and ignores no ignore-file.
    let walker = ignore::WalkBuilder::new(path)
        .max_depth(Some(1))
        .standard_filters(false)
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.depth() == 0 {
            continue;
        }

        let entry_path = entry.path();
        let entry_name = entry
            .file_name()
            .to_str()
            .ok_or_else(|| {
                Error::invalid_entry(format!("Invalid filename: {}", entry_path.display()))
            })?
            .to_string();

        let Some(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_symlink() {
            let target = fs::read_link(entry_path)?;
            let target = target.to_str().ok_or_else(|| {
                Error::invalid_entry(format!("Invalid link target: {}", entry_path.display()))
            })?;
            node.children
                .push(Node::symlink(entry_name, target.to_string()));
        } else if file_type.is_dir() {
            node.children.push(build_dir(entry_path, entry_name, stash)?);
        } else if file_type.is_file() {
            let id = stash(entry_path)?;
            node.children.push(Node::file(entry_name, id.to_hex()));
        } else {
            debug!(path = %entry_path.display(), "skipping special file");
        }
    }

    node.children.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(node)
}

fn walk_node<F>(node: &mut Node, f: &mut F)
where
    F: FnMut(&mut Node),
{
    if !node.value.is_empty() {
        f(node);
    }
    for child in node.children.iter_mut() {
        walk_node(child, f);
    }
}

fn collect_files<'a>(node: &'a mut Node, out: &mut Vec<&'a mut Node>) {
    if node.kind == NodeKind::File {
        out.push(node);
        return;
    }
    for child in node.children.iter_mut() {
        collect_files(child, out);
    }
}

/// Concatenate the group's staged objects into one bundle in `tpool`
/// and rewrite the member nodes to reference it. Returns false if the
/// group was skipped.
fn write_bundle(group: Vec<(&mut Node, u64)>, tpool: &Path) -> bool {
    let mut buf = Vec::new();
    let mut ranges = Vec::with_capacity(group.len());

    for (node, _) in &group {
        match fs::read(tpool.join(&node.value)) {
            Ok(bytes) => {
                ranges.push((buf.len() as u64, bytes.len() as u64));
                buf.extend_from_slice(&bytes);
            }
            Err(err) => {
                debug!(id = %node.value, error = %err, "bundle member unreadable, group skipped");
                return false;
            }
        }
    }

    let id = Hash::hash_bytes(&buf);
    let bundle_path = tpool.join(id.to_hex());
    if !bundle_path.exists() {
        if let Err(err) = fs::write(&bundle_path, &buf) {
            warn!(id = %id, error = %err, "failed to stage bundle, group skipped");
            return false;
        }
    }

    for ((node, _), (offset, size)) in group.into_iter().zip(ranges) {
        node.value = id.to_hex();
        node.offset = Some(offset);
        node.size = Some(size);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hash_only(path: &Path) -> Result<Hash> {
        Hash::hash_file(path)
    }

    /// Find a node by child names from the root.
    fn find<'a>(tree: &'a Tree, path: &[&str]) -> &'a Node {
        let mut node = &tree.root;
        for name in path {
            node = node
                .children
                .iter()
                .find(|c| c.name == *name)
                .unwrap_or_else(|| panic!("no child named {}", name));
        }
        node
    }

    #[test]
    fn test_build_single_file_root() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("data.txt");
        fs::write(&file, b"hello").unwrap();

        let tree = Tree::build(&file, hash_only).unwrap();
        assert_eq!(tree.root.kind, NodeKind::File);
        assert_eq!(tree.root.value, Hash::hash_bytes(b"hello").to_hex());
    }

    #[test]
    fn test_build_directory_sorted_children() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("src");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("z.txt"), b"zz").unwrap();
        fs::write(root.join("a.txt"), b"aa").unwrap();
        fs::write(root.join("m.txt"), b"mm").unwrap();

        let tree = Tree::build(&root, hash_only).unwrap();
        assert_eq!(tree.root.kind, NodeKind::Dir);
        let names: Vec<_> = tree.root.children.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "m.txt", "z.txt"]);
    }

    #[test]
    fn test_build_nested_and_hidden() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join(".hidden"), b"secret").unwrap();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("inner.txt"), b"inner").unwrap();

        let tree = Tree::build(&root, hash_only).unwrap();
        assert_eq!(find(&tree, &[".hidden"]).kind, NodeKind::File);
        let inner = find(&tree, &["sub", "inner.txt"]);
        assert_eq!(inner.value, Hash::hash_bytes(b"inner").to_hex());
    }

    #[test]
    #[cfg(unix)]
    fn test_build_symlink_records_target() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("target.txt"), b"data").unwrap();
        std::os::unix::fs::symlink("target.txt", root.join("link")).unwrap();

        let tree = Tree::build(&root, hash_only).unwrap();
        let link = find(&tree, &["link"]);
        assert_eq!(link.kind, NodeKind::Symlink);
        assert_eq!(link.value, "target.txt");
    }

    #[test]
    fn test_build_nonexistent_root() {
        let temp_dir = TempDir::new().unwrap();
        let result = Tree::build(&temp_dir.path().join("missing"), hash_only);
        assert!(result.is_err());
    }

    #[test]
    fn test_build_stash_error_aborts() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"aa").unwrap();

        let result = Tree::build(&root, |_| Err(Error::invalid_entry("boom")));
        assert!(result.is_err());
    }

    #[test]
    fn test_walk_visits_value_nodes_only() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"aa").unwrap();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b.txt"), b"bb").unwrap();

        let mut tree = Tree::build(&root, hash_only).unwrap();
        let mut visited = Vec::new();
        tree.walk(|node| visited.push(node.name.clone()));
        assert_eq!(visited, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_save_load_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path().join("root");
        fs::create_dir(&root).unwrap();
        fs::write(root.join("a.txt"), b"alpha").unwrap();
        let sub = root.join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("b.txt"), b"beta").unwrap();

        let tree = Tree::build(&root, hash_only).unwrap();
        let meta = temp_dir.path().join("meta.json");
        tree.save(&meta).unwrap();

        let loaded = Tree::load(&meta).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn test_save_overwrites_existing() {
        let temp_dir = TempDir::new().unwrap();
        let meta = temp_dir.path().join("meta.json");
        fs::write(&meta, b"stale").unwrap();

        let tree = Tree {
            root: Node::dir(""),
        };
        tree.save(&meta).unwrap();
        let loaded = Tree::load(&meta).unwrap();
        assert_eq!(loaded, tree);
    }

    #[test]
    fn test_load_invalid_json() {
        let temp_dir = TempDir::new().unwrap();
        let meta = temp_dir.path().join("meta.json");
        fs::write(&meta, b"not a tree").unwrap();
        assert!(Tree::load(&meta).is_err());
    }

    fn stage(tpool: &Path, data: &[u8]) -> String {
        let hex = Hash::hash_bytes(data).to_hex();
        fs::write(tpool.join(&hex), data).unwrap();
        hex
    }

    #[test]
    fn test_bundle_groups_small_files() {
        let temp_dir = TempDir::new().unwrap();
        let tpool = temp_dir.path();

        let id_a = stage(tpool, b"aaaa");
        let id_b = stage(tpool, b"bbbbbb");
        let mut tree = Tree {
            root: Node::dir(""),
        };
        tree.root.children.push(Node::file("a.txt", &id_a));
        tree.root.children.push(Node::file("b.txt", &id_b));

        let bundles = tree.bundle(1024, 4096, tpool);
        assert_eq!(bundles, 1);

        let a = &tree.root.children[0];
        let b = &tree.root.children[1];
        assert_eq!(a.value, b.value);
        assert_ne!(a.value, id_a);
        assert_eq!(a.offset, Some(0));
        assert_eq!(a.size, Some(4));
        assert_eq!(b.offset, Some(4));
        assert_eq!(b.size, Some(6));

        // The staged bundle is the members' concatenation, addressed by
        // its own hash.
        let bundle_bytes = fs::read(tpool.join(&a.value)).unwrap();
        assert_eq!(bundle_bytes, b"aaaabbbbbb");
        assert_eq!(Hash::hash_bytes(&bundle_bytes).to_hex(), a.value);

        // Member bytes reconstruct from the recorded range.
        let start = a.offset.unwrap() as usize;
        let end = start + a.size.unwrap() as usize;
        assert_eq!(&bundle_bytes[start..end], b"aaaa");
    }

    #[test]
    fn test_bundle_respects_asize() {
        let temp_dir = TempDir::new().unwrap();
        let tpool = temp_dir.path();

        let mut tree = Tree {
            root: Node::dir(""),
        };
        for i in 0..4u8 {
            let data = vec![i; 100];
            let hex = stage(tpool, &data);
            tree.root.children.push(Node::file(format!("f{}", i), hex));
        }

        // Cap at two members per bundle.
        let bundles = tree.bundle(1024, 200, tpool);
        assert_eq!(bundles, 2);
        assert_eq!(tree.root.children[0].value, tree.root.children[1].value);
        assert_eq!(tree.root.children[2].value, tree.root.children[3].value);
        assert_ne!(tree.root.children[0].value, tree.root.children[2].value);
    }

    #[test]
    fn test_bundle_skips_large_and_singleton() {
        let temp_dir = TempDir::new().unwrap();
        let tpool = temp_dir.path();

        let small = stage(tpool, b"small");
        let large = stage(tpool, &vec![7u8; 2048]);
        let mut tree = Tree {
            root: Node::dir(""),
        };
        tree.root.children.push(Node::file("small", &small));
        tree.root.children.push(Node::file("large", &large));

        // Only one candidate below bsize: singleton group, left alone.
        let bundles = tree.bundle(1024, 4096, tpool);
        assert_eq!(bundles, 0);
        assert_eq!(tree.root.children[0].value, small);
        assert_eq!(tree.root.children[0].offset, None);
        assert_eq!(tree.root.children[1].value, large);
    }

    #[test]
    fn test_bundle_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let tpool = temp_dir.path();

        let id_a = stage(tpool, b"aaaa");
        let id_b = stage(tpool, b"bbbb");
        let mut tree = Tree {
            root: Node::dir(""),
        };
        tree.root.children.push(Node::file("a", &id_a));
        tree.root.children.push(Node::file("b", &id_b));

        assert_eq!(tree.bundle(0, 4096, tpool), 0);
        assert_eq!(tree.root.children[0].value, id_a);
    }

    #[test]
    fn test_bundle_unstaged_left_alone() {
        let temp_dir = TempDir::new().unwrap();
        let tpool = temp_dir.path();

        // Valid identifier but nothing staged under it.
        let ghost = Hash::hash_bytes(b"ghost").to_hex();
        let id_a = stage(tpool, b"aaaa");
        let id_b = stage(tpool, b"bbbb");
        let mut tree = Tree {
            root: Node::dir(""),
        };
        tree.root.children.push(Node::file("ghost", &ghost));
        tree.root.children.push(Node::file("a", &id_a));
        tree.root.children.push(Node::file("b", &id_b));

        let bundles = tree.bundle(1024, 4096, tpool);
        assert_eq!(bundles, 1);
        assert_eq!(tree.root.children[0].value, ghost);
        assert_eq!(tree.root.children[0].offset, None);
        assert_eq!(tree.root.children[1].value, tree.root.children[2].value);
    }

    #[test]
    fn test_bundle_duplicate_identifier_stays_standalone() {
        let temp_dir = TempDir::new().unwrap();
        let tpool = temp_dir.path();

        let id = stage(tpool, b"same");
        let other = stage(tpool, b"other");
        let mut tree = Tree {
            root: Node::dir(""),
        };
        tree.root.children.push(Node::file("one", &id));
        tree.root.children.push(Node::file("two", &id));
        tree.root.children.push(Node::file("three", &other));

        let bundles = tree.bundle(1024, 4096, tpool);
        assert_eq!(bundles, 1);
        // First occurrence and the distinct file are bundled; the
        // duplicate keeps its standalone identifier.
        assert_eq!(tree.root.children[0].value, tree.root.children[2].value);
        assert_eq!(tree.root.children[1].value, id);
        assert_eq!(tree.root.children[1].offset, None);
    }
}
