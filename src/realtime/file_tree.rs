//! Client-side cache of a task's workspace file tree, patched from
//! file-change events.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tasklane_common::models::{FileChange, FileOperation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Folder,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileNode {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NodeKind,
    /// Absolute path from the workspace root, with a leading `/`.
    pub path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FileNode>,
}

impl FileNode {
    fn new(name: &str, kind: NodeKind, path: String) -> Self {
        Self {
            name: name.to_string(),
            kind,
            path,
            children: Vec::new(),
        }
    }
}

/// Folders before files, then by name.
fn sibling_order(a: &FileNode, b: &FileNode) -> Ordering {
    match (a.kind, b.kind) {
        (NodeKind::Folder, NodeKind::File) => Ordering::Less,
        (NodeKind::File, NodeKind::Folder) => Ordering::Greater,
        _ => a.name.cmp(&b.name),
    }
}

fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileTree {
    roots: Vec<FileNode>,
}

impl FileTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_paths<'a>(paths: impl IntoIterator<Item = &'a str>) -> Self {
        let mut tree = Self::new();
        for path in paths {
            tree.insert_file(path);
        }
        tree
    }

    pub fn roots(&self) -> &[FileNode] {
        &self.roots
    }

    /// Apply one change. Only CREATE and DELETE alter the shape of the tree.
    pub fn apply(&mut self, change: &FileChange) {
        match change.operation {
            FileOperation::Create => self.insert_file(&change.file_path),
            FileOperation::Delete => {
                self.remove(&change.file_path);
            }
            FileOperation::Update | FileOperation::Rename => {}
        }
    }

    /// Insert a file, creating any missing parent folders.
    pub fn insert_file(&mut self, path: &str) {
        let parts = segments(path);
        let Some((file_name, folders)) = parts.split_last() else {
            return;
        };

        let mut level = &mut self.roots;
        let mut prefix = String::new();
        for folder in folders {
            prefix.push('/');
            prefix.push_str(folder);
            let index = match level.iter().position(|n| n.name == *folder) {
                Some(index) => index,
                None => {
                    level.push(FileNode::new(folder, NodeKind::Folder, prefix.clone()));
                    level.sort_by(sibling_order);
                    level
                        .iter()
                        .position(|n| n.name == *folder)
                        .unwrap_or(level.len() - 1)
                }
            };
            if level[index].kind != NodeKind::Folder {
                // a file already occupies this name
                return;
            }
            level = &mut level[index].children;
        }

        if level.iter().all(|n| n.name != *file_name) {
            level.push(FileNode::new(file_name, NodeKind::File, format!("{prefix}/{file_name}")));
            level.sort_by(sibling_order);
        }
    }

    /// Remove the node at `path` and prune folders left empty above it.
    pub fn remove(&mut self, path: &str) -> bool {
        let parts = segments(path);
        if parts.is_empty() {
            return false;
        }
        remove_from(&mut self.roots, &parts)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    pub fn find(&self, path: &str) -> Option<&FileNode> {
        let mut level = &self.roots;
        let mut found = None;
        for part in segments(path) {
            let node = level.iter().find(|n| n.name == part)?;
            level = &node.children;
            found = Some(node);
        }
        found
    }

    /// Every file path in the tree, depth first.
    pub fn file_paths(&self) -> Vec<String> {
        fn walk(nodes: &[FileNode], out: &mut Vec<String>) {
            for node in nodes {
                match node.kind {
                    NodeKind::File => out.push(node.path.clone()),
                    NodeKind::Folder => walk(&node.children, out),
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }
}

fn remove_from(level: &mut Vec<FileNode>, parts: &[&str]) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some(index) = level.iter().position(|n| n.name == *first) else {
        return false;
    };
    if rest.is_empty() {
        level.remove(index);
        return true;
    }
    let node = &mut level[index];
    if node.kind != NodeKind::Folder || !remove_from(&mut node.children, rest) {
        return false;
    }
    if node.children.is_empty() {
        level.remove(index);
    }
    true
}
