pub mod download;
pub mod fs;
pub mod memory;

pub use download::{DownloadPolicy, download_to_path};
pub use fs::FsRemoteStore;
pub use memory::MemoryRemoteStore;

use async_trait::async_trait;
use bytes::Bytes;
use common::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Folder,
    File,
    Shortcut,
}

/// One entry in the remote hierarchy. Ids are opaque to callers.
#[derive(Debug, Clone)]
pub struct RemoteNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
}

/// One page of a folder listing. `next_token` is `None` on the last page.
#[derive(Debug, Default)]
pub struct NodePage {
    pub nodes: Vec<RemoteNode>,
    pub next_token: Option<String>,
}

/// The durable, hierarchical object store that owns the authoritative copy
/// of the dataset. Vendor clients implement this seam; the engine only ever
/// talks through it.
///
/// Contract notes:
/// - `delete` on an already-absent id is success, not an error.
/// - `list_page` results are partitioned into pages by the backend; callers
///   that need the full listing go through [`list_children`].
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Follows a shortcut/alias to its target id. Non-shortcut ids pass
    /// through unchanged.
    async fn resolve_shortcut(&self, id: &str) -> Result<String>;

    async fn list_page(
        &self,
        parent_id: &str,
        kind: Option<NodeKind>,
        page_token: Option<&str>,
    ) -> Result<NodePage>;

    async fn find_child_by_name(&self, parent_id: &str, name: &str)
    -> Result<Option<RemoteNode>>;

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String>;

    async fn object_size(&self, file_id: &str) -> Result<u64>;

    async fn read_range(&self, file_id: &str, offset: u64, len: u64) -> Result<Bytes>;

    async fn read_whole(&self, file_id: &str) -> Result<Bytes>;

    /// Creates a new object under `parent_id`; returns its id.
    async fn upload(&self, parent_id: &str, name: &str, data: Bytes) -> Result<String>;

    async fn delete(&self, id: &str) -> Result<()>;
}

/// Lists every child of a folder, walking all result pages. Backends are
/// free to paginate aggressively; stopping at the first page would silently
/// truncate partitions.
pub async fn list_children(
    store: &dyn RemoteStore,
    parent_id: &str,
    kind: Option<NodeKind>,
) -> Result<Vec<RemoteNode>> {
    let mut nodes = Vec::new();
    let mut token: Option<String> = None;

    loop {
        let page = store.list_page(parent_id, kind, token.as_deref()).await?;
        nodes.extend(page.nodes);
        token = page.next_token;
        if token.is_none() {
            break;
        }
    }

    Ok(nodes)
}
