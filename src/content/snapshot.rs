//! Content trees served from JSON snapshots on disk.
//!
//! ```text
//! {root}/index.json          {"<book url>": {"lib": "chem", "id": 7}, ...}
//! {root}/{lib}-{id}.json     ContentNode tree
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{ContentError, ContentSource};
use crate::models::{BookId, ContentNode, MatterKind, TAG_GUIDE};
use crate::utils::write_atomic;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    lib: String,
    id: u64,
}

pub struct SnapshotContentSource {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl SnapshotContentSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("index.json")
    }

    fn tree_path(&self, book: &BookId) -> PathBuf {
        self.root.join(format!("{}.json", book.job_key()))
    }

    /// Strip query, fragment and trailing slash so equivalent links match.
    fn normalize(url: &str) -> Option<String> {
        let mut parsed = Url::parse(url.trim()).ok()?;
        parsed.set_query(None);
        parsed.set_fragment(None);
        Some(parsed.as_str().trim_end_matches('/').to_string())
    }

    async fn read_index(&self) -> Result<HashMap<String, IndexEntry>, ContentError> {
        match tokio::fs::read(self.index_path()).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_tree(&self, book: &BookId, tree: &ContentNode) -> Result<(), ContentError> {
        let bytes = serde_json::to_vec_pretty(tree)?;
        write_atomic(&self.tree_path(book), bytes).await?;
        Ok(())
    }

    /// Register `tree` under `url`, replacing any previous snapshot.
    pub async fn insert(&self, url: &str, tree: &ContentNode) -> Result<BookId, ContentError> {
        let key = Self::normalize(url).ok_or_else(|| ContentError::InvalidUrl {
            url: url.to_string(),
            reason: "not an absolute URL".to_string(),
        })?;
        let book = tree.book_id();

        let _guard = self.write_lock.lock().await;
        let mut index = self.read_index().await?;
        index.insert(
            key,
            IndexEntry {
                lib: book.lib.clone(),
                id: book.page_id,
            },
        );
        write_atomic(&self.index_path(), serde_json::to_vec_pretty(&index)?).await?;
        self.write_tree(&book, tree).await?;
        Ok(book)
    }
}

fn max_id(node: &ContentNode) -> u64 {
    node.children.iter().map(max_id).fold(node.id, u64::max)
}

fn matter_node(root: &ContentNode, kind: MatterKind, id: u64) -> ContentNode {
    let slug = match kind {
        MatterKind::Front => "00:_Front_Matter",
        MatterKind::Back => "zz:_Back_Matter",
    };
    ContentNode {
        id,
        lib: root.lib.clone(),
        title: kind.container_title().to_string(),
        url: format!("{}/{}", root.url.trim_end_matches('/'), slug),
        subdomain: root.subdomain.clone(),
        summary: String::new(),
        tags: vec![TAG_GUIDE.to_string()],
        license: root.license.clone(),
        matter_type: Some(kind),
        print_info: Default::default(),
        children: Vec::new(),
    }
}

#[async_trait]
impl ContentSource for SnapshotContentSource {
    async fn resolve(&self, url: &str) -> Result<Option<BookId>, ContentError> {
        let Some(key) = Self::normalize(url) else {
            warn!("Cannot resolve malformed URL {}", url);
            return Ok(None);
        };
        let index = self.read_index().await?;
        Ok(index.get(&key).map(|e| BookId::new(e.lib.clone(), e.id)))
    }

    async fn discover(&self, book: &BookId) -> Result<ContentNode, ContentError> {
        let bytes = match tokio::fs::read(self.tree_path(book)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ContentError::NotFound(book.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let tree: ContentNode = serde_json::from_slice(&bytes)?;
        debug!("Discovered {} with {} pages", book, tree.node_count());
        Ok(tree)
    }

    async fn create_matter(
        &self,
        root: &ContentNode,
        kind: MatterKind,
    ) -> Result<(), ContentError> {
        let book = root.book_id();
        let _guard = self.write_lock.lock().await;
        let mut tree = self.discover(&book).await?;
        if tree.matter_section(kind).is_some() {
            return Ok(());
        }

        let node = matter_node(&tree, kind, max_id(&tree) + 1);
        info!("Creating {} for {}", node.title, book);
        match kind {
            MatterKind::Front => tree.children.insert(0, node),
            MatterKind::Back => tree.children.push(node),
        }
        self.write_tree(&book, &tree).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, title: &str, children: Vec<ContentNode>) -> ContentNode {
        ContentNode {
            id,
            lib: "bio".to_string(),
            title: title.to_string(),
            url: format!("https://bio.example.org/{}", id),
            subdomain: "bio".to_string(),
            summary: String::new(),
            tags: Vec::new(),
            license: None,
            matter_type: None,
            print_info: Default::default(),
            children,
        }
    }

    #[tokio::test]
    async fn test_resolve_normalizes_url() {
        let dir = tempfile::tempdir().unwrap();
        let source = SnapshotContentSource::new(dir.path());
        source
            .insert("https://bio.example.org/Books/Cells/", &node(12, "Cells", vec![]))
            .await
            .unwrap();

        let book = source
            .resolve("https://bio.example.org/Books/Cells?x=1#top")
            .await
            .unwrap();
        assert_eq!(book, Some(BookId::new("bio", 12)));
        assert_eq!(source.resolve("https://bio.example.org/Other").await.unwrap(), None);
        assert_eq!(source.resolve("not a url").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_discover_missing_tree_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let source = SnapshotContentSource::new(dir.path());
        let err = source.discover(&BookId::new("bio", 1)).await.unwrap_err();
        assert!(matches!(err, ContentError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_create_matter_adds_sections_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = SnapshotContentSource::new(dir.path());
        let root = node(1, "Book", vec![node(2, "1: Chapter", vec![])]);
        source.insert("https://bio.example.org/Book", &root).await.unwrap();

        source.create_matter(&root, MatterKind::Front).await.unwrap();
        source.create_matter(&root, MatterKind::Back).await.unwrap();
        source.create_matter(&root, MatterKind::Back).await.unwrap();

        let tree = source.discover(&root.book_id()).await.unwrap();
        let titles: Vec<&str> = tree.children.iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Front Matter", "1: Chapter", "Back Matter"]);
        assert_eq!(tree.children[0].id, 3);
        assert_eq!(tree.children[2].id, 4);
        assert!(tree.matter_section(MatterKind::Front).is_some());
    }
}
