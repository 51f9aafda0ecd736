use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use common::{Error, Result};

use super::{NodeKind, NodePage, RemoteNode, RemoteStore};

/// In-process remote store used by tests and demos. Paginates listings so
/// callers that forget to walk pages are caught early.
pub struct MemoryRemoteStore {
    state: Mutex<State>,
    page_size: usize,
    read_calls: AtomicU64,
}

struct State {
    nodes: HashMap<String, Node>,
    next_id: u64,
}

struct Node {
    name: String,
    parent: Option<String>,
    kind: NodeKind,
    data: Bytes,
    shortcut_target: Option<String>,
}

impl MemoryRemoteStore {
    pub const ROOT: &'static str = "root";

    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            Self::ROOT.to_string(),
            Node {
                name: String::new(),
                parent: None,
                kind: NodeKind::Folder,
                data: Bytes::new(),
                shortcut_target: None,
            },
        );
        Self {
            state: Mutex::new(State { nodes, next_id: 1 }),
            page_size: page_size.max(1),
            read_calls: AtomicU64::new(0),
        }
    }

    /// Number of `read_range`/`read_whole` calls served so far.
    pub fn read_count(&self) -> u64 {
        self.read_calls.load(Ordering::SeqCst)
    }

    pub fn create_shortcut(&self, parent_id: &str, name: &str, target_id: &str) -> String {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let id = format!("n{}", state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id.clone(),
            Node {
                name: name.to_string(),
                parent: Some(parent_id.to_string()),
                kind: NodeKind::Shortcut,
                data: Bytes::new(),
                shortcut_target: Some(target_id.to_string()),
            },
        );
        id
    }

    fn children_sorted(state: &State, parent_id: &str, kind: Option<NodeKind>) -> Vec<RemoteNode> {
        let mut children: Vec<RemoteNode> = state
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.as_deref() == Some(parent_id))
            .filter(|(_, node)| kind.is_none_or(|k| node.kind == k))
            .map(|(id, node)| RemoteNode {
                id: id.clone(),
                name: node.name.clone(),
                kind: node.kind,
            })
            .collect();
        children.sort_by(|a, b| a.name.cmp(&b.name));
        children
    }
}

impl Default for MemoryRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn resolve_shortcut(&self, id: &str) -> Result<String> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        match state.nodes.get(id) {
            Some(node) => Ok(node
                .shortcut_target
                .clone()
                .unwrap_or_else(|| id.to_string())),
            None => Err(Error::NotFound(format!("No such node: {}", id))),
        }
    }

    async fn list_page(
        &self,
        parent_id: &str,
        kind: Option<NodeKind>,
        page_token: Option<&str>,
    ) -> Result<NodePage> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.nodes.contains_key(parent_id) {
            return Err(Error::NotFound(format!("No such folder: {}", parent_id)));
        }

        let children = Self::children_sorted(&state, parent_id, kind);
        let offset: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Bad page token: {}", token)))?,
            None => 0,
        };

        let end = (offset + self.page_size).min(children.len());
        let next_token = (end < children.len()).then(|| end.to_string());

        Ok(NodePage {
            nodes: children[offset..end].to_vec(),
            next_token,
        })
    }

    async fn find_child_by_name(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<Option<RemoteNode>> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .nodes
            .iter()
            .find(|(_, node)| node.parent.as_deref() == Some(parent_id) && node.name == name)
            .map(|(id, node)| RemoteNode {
                id: id.clone(),
                name: node.name.clone(),
                kind: node.kind,
            }))
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.nodes.contains_key(parent_id) {
            return Err(Error::NotFound(format!("No such folder: {}", parent_id)));
        }
        let id = format!("n{}", state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id.clone(),
            Node {
                name: name.to_string(),
                parent: Some(parent_id.to_string()),
                kind: NodeKind::Folder,
                data: Bytes::new(),
                shortcut_target: None,
            },
        );
        Ok(id)
    }

    async fn object_size(&self, file_id: &str) -> Result<u64> {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .nodes
            .get(file_id)
            .map(|node| node.data.len() as u64)
            .ok_or_else(|| Error::NotFound(format!("No such object: {}", file_id)))
    }

    async fn read_range(&self, file_id: &str, offset: u64, len: u64) -> Result<Bytes> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let node = state
            .nodes
            .get(file_id)
            .ok_or_else(|| Error::NotFound(format!("No such object: {}", file_id)))?;
        let start = (offset as usize).min(node.data.len());
        let end = (start + len as usize).min(node.data.len());
        Ok(node.data.slice(start..end))
    }

    async fn read_whole(&self, file_id: &str) -> Result<Bytes> {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state
            .nodes
            .get(file_id)
            .map(|node| node.data.clone())
            .ok_or_else(|| Error::NotFound(format!("No such object: {}", file_id)))
    }

    async fn upload(&self, parent_id: &str, name: &str, data: Bytes) -> Result<String> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if !state.nodes.contains_key(parent_id) {
            return Err(Error::NotFound(format!("No such folder: {}", parent_id)));
        }
        let id = format!("n{}", state.next_id);
        state.next_id += 1;
        state.nodes.insert(
            id.clone(),
            Node {
                name: name.to_string(),
                parent: Some(parent_id.to_string()),
                kind: NodeKind::File,
                data,
                shortcut_target: None,
            },
        );
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        // Idempotent: deleting what is already gone is success.
        if state.nodes.remove(id).is_none() {
            return Ok(());
        }
        // Drop any orphaned descendants along with a folder.
        let mut orphans: Vec<String> = vec![id.to_string()];
        while let Some(parent) = orphans.pop() {
            let children: Vec<String> = state
                .nodes
                .iter()
                .filter(|(_, node)| node.parent.as_deref() == Some(parent.as_str()))
                .map(|(child_id, _)| child_id.clone())
                .collect();
            for child in children {
                state.nodes.remove(&child);
                orphans.push(child);
            }
        }
        Ok(())
    }
}
