//! The path tree that defers metadata application until extraction is done.
//!
//! Creating a file inside a directory bumps the directory's mtime, and a read-only
//! directory can't be populated at all, so directory metadata can only be applied once
//! everything below it exists.  Each materialized path is recorded here as it is created;
//! [`MetadataTree::apply_all()`] then visits the tree in postorder.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use log::trace;

use crate::{
    error::{Error, Result},
    header::EntryHeader,
    metadata::MetadataApplier,
    util::{parent_key, relative_key, ROOT_KEY},
};

/// Index of a node in the arena.
pub type NodeId = usize;

/// One path in the tree.
///
/// Nodes that were only ever referenced as somebody's parent directory are placeholders:
/// they have neither a header nor a full path and are skipped during application.
#[derive(Debug, Default)]
pub struct Node {
    pub header: Option<EntryHeader>,
    pub full_path: Option<PathBuf>,
    pub children: Vec<NodeId>,
}

impl Node {
    pub fn is_placeholder(&self) -> bool {
        self.full_path.is_none()
    }
}

#[derive(Debug)]
pub struct MetadataTree {
    root: PathBuf,
    nodes: Vec<Node>,
    index: HashMap<PathBuf, NodeId>,
}

impl MetadataTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            nodes: vec![],
            index: HashMap::new(),
        }
    }

    /// The directory everything is extracted into.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Looks up a node by its path relative to the root (`.` for the root itself).
    pub fn get(&self, key: impl AsRef<Path>) -> Option<&Node> {
        self.index.get(key.as_ref()).map(|&id| &self.nodes[id])
    }

    /// Returns the node for `key`, creating it (and, recursively, its missing ancestors)
    /// as a placeholder if needed.  New nodes are appended to their parent's children.
    fn get_or_insert(&mut self, key: &Path) -> NodeId {
        if let Some(&id) = self.index.get(key) {
            return id;
        }

        let id = self.nodes.len();
        self.nodes.push(Node::default());
        self.index.insert(key.into(), id);

        if let Some(parent) = parent_key(key) {
            let parent = self.get_or_insert(&parent);
            self.nodes[parent].children.push(id);
        }

        id
    }

    /// Records that `full_path` was created from `header`.
    ///
    /// The node is keyed by the path relative to the root.  If the path was seen before
    /// (as a placeholder or as an earlier entry), that node is reused and its header
    /// replaced; children already attached to it stay attached.
    pub fn add(&mut self, full_path: impl Into<PathBuf>, header: EntryHeader) -> Result<NodeId> {
        let full_path = full_path.into();
        let key = relative_key(&self.root, &full_path)?;

        let id = self.get_or_insert(&key);
        let node = &mut self.nodes[id];
        node.header = Some(header);
        node.full_path = Some(full_path);

        Ok(id)
    }

    /// Node ids in postorder: every node comes after all of its descendants.
    fn postorder(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(root, false)];

        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
            } else {
                stack.push((id, true));
                // reversed, so that children are visited in insertion order
                for &child in self.nodes[id].children.iter().rev() {
                    stack.push((child, false));
                }
            }
        }

        order
    }

    /// Applies the recorded metadata of every node, children before their parents.
    ///
    /// Placeholders are skipped.  The first failure stops the walk and is returned
    /// wrapped in `Error::ApplyMetadata` with the node's full path.
    pub fn apply_all(&self, applier: &mut impl MetadataApplier) -> Result<()> {
        let Some(&root) = self.index.get(Path::new(ROOT_KEY)) else {
            return Err(Error::MissingRoot);
        };

        for id in self.postorder(root) {
            let node = &self.nodes[id];
            let (Some(path), Some(header)) = (&node.full_path, &node.header) else {
                continue;
            };

            trace!("applying metadata to {path:?}");
            applier
                .apply(path, header)
                .map_err(|e| Error::apply_metadata(path, e))?;
        }

        Ok(())
    }
}
