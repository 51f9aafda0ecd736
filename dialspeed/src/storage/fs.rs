use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use common::{Error, Result};
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{NodeKind, NodePage, RemoteNode, RemoteStore};

const SHORTCUT_EXT: &str = "shortcut";

/// Remote tier rooted at a mounted directory (NFS share, synced volume).
/// Node ids are relative paths under the root; a `*.shortcut` file holds
/// the id of its target and is resolved before traversal.
pub struct FsRemoteStore {
    root: PathBuf,
    page_size: usize,
}

impl FsRemoteStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    fn node_path(&self, id: &str) -> Result<PathBuf> {
        let rel = Path::new(id);
        let safe = rel.components().all(|c| matches!(c, Component::Normal(_)));
        if !(id.is_empty() || safe) {
            return Err(Error::InvalidInput(format!("Malformed node id: {}", id)));
        }
        Ok(self.root.join(rel))
    }

    fn child_id(parent_id: &str, name: &str) -> String {
        if parent_id.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", parent_id, name)
        }
    }

    fn node_kind(is_dir: bool, name: &str) -> NodeKind {
        if is_dir {
            NodeKind::Folder
        } else if name.ends_with(&format!(".{}", SHORTCUT_EXT)) {
            NodeKind::Shortcut
        } else {
            NodeKind::File
        }
    }
}

#[async_trait]
impl RemoteStore for FsRemoteStore {
    async fn resolve_shortcut(&self, id: &str) -> Result<String> {
        let path = self.node_path(id)?;
        if path.extension().and_then(|e| e.to_str()) == Some(SHORTCUT_EXT)
            && tokio::fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false)
        {
            let target = tokio::fs::read_to_string(&path).await?;
            return Ok(target.trim().to_string());
        }
        Ok(id.to_string())
    }

    async fn list_page(
        &self,
        parent_id: &str,
        kind: Option<NodeKind>,
        page_token: Option<&str>,
    ) -> Result<NodePage> {
        let dir = self.node_path(parent_id)?;
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| Error::Storage(format!("Cannot list {}: {}", parent_id, e)))?;

        let mut children = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            let is_dir = entry.file_type().await?.is_dir();
            let node_kind = Self::node_kind(is_dir, &name);
            if kind.is_none_or(|k| node_kind == k) {
                children.push(RemoteNode {
                    id: Self::child_id(parent_id, &name),
                    name,
                    kind: node_kind,
                });
            }
        }
        children.sort_by(|a, b| a.name.cmp(&b.name));

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
        let id = Self::child_id(parent_id, name);
        let path = self.node_path(&id)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(RemoteNode {
                id,
                name: name.to_string(),
                kind: Self::node_kind(meta.is_dir(), name),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&self, parent_id: &str, name: &str) -> Result<String> {
        let id = Self::child_id(parent_id, name);
        tokio::fs::create_dir_all(self.node_path(&id)?).await?;
        Ok(id)
    }

    async fn object_size(&self, file_id: &str) -> Result<u64> {
        let meta = tokio::fs::metadata(self.node_path(file_id)?)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("No such object: {}", file_id))
                }
                _ => e.into(),
            })?;
        Ok(meta.len())
    }

    async fn read_range(&self, file_id: &str, offset: u64, len: u64) -> Result<Bytes> {
        let mut file = tokio::fs::File::open(self.node_path(file_id)?)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("No such object: {}", file_id))
                }
                _ => e.into(),
            })?;
        file.seek(std::io::SeekFrom::Start(offset)).await?;
        let mut buf = Vec::with_capacity(len as usize);
        file.take(len).read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn read_whole(&self, file_id: &str) -> Result<Bytes> {
        let data = tokio::fs::read(self.node_path(file_id)?)
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    Error::NotFound(format!("No such object: {}", file_id))
                }
                _ => e.into(),
            })?;
        Ok(Bytes::from(data))
    }

    async fn upload(&self, parent_id: &str, name: &str, data: Bytes) -> Result<String> {
        let id = Self::child_id(parent_id, name);
        let path = self.node_path(&id)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &data).await?;
        Ok(id)
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.node_path(id)?;
        let result = match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::list_children;

    #[tokio::test]
    async fn test_round_trip_and_listing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRemoteStore::new(dir.path()).with_page_size(2);

        let folder = store.create_folder("", "Date=2024-02-01").await.unwrap();
        for i in 0..5 {
            store
                .upload(&folder, &format!("part{}.parquet", i), Bytes::from(vec![i as u8; 16]))
                .await
                .unwrap();
        }

        let children = list_children(&store, &folder, None).await.unwrap();
        assert_eq!(children.len(), 5);

        let file_id = &children[0].id;
        assert_eq!(store.object_size(file_id).await.unwrap(), 16);
        assert_eq!(store.read_range(file_id, 4, 4).await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_shortcut_file_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRemoteStore::new(dir.path());

        let target = store.create_folder("", "dataset").await.unwrap();
        store
            .upload("", "alias.shortcut", Bytes::from(format!("{}\n", target)))
            .await
            .unwrap();

        assert_eq!(store.resolve_shortcut("alias.shortcut").await.unwrap(), target);
        assert_eq!(store.resolve_shortcut(&target).await.unwrap(), target);
    }

    #[tokio::test]
    async fn test_delete_folder_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRemoteStore::new(dir.path());

        let folder = store.create_folder("", "Date=2024-02-01").await.unwrap();
        store
            .upload(&folder, "a.parquet", Bytes::from_static(b"x"))
            .await
            .unwrap();

        store.delete(&folder).await.unwrap();
        store.delete(&folder).await.unwrap();
        assert!(store.find_child_by_name("", "Date=2024-02-01").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_traversal() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRemoteStore::new(dir.path());
        assert!(store.read_whole("../etc/passwd").await.is_err());
    }
}
