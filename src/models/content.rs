//! Content tree snapshot produced by the content source.
//!
//! The tree is discovered once per job run and treated as immutable while
//! the pipeline works on it.

use serde::{Deserialize, Serialize};

pub const TAG_CATEGORY: &str = "article:topic-category";
pub const TAG_GUIDE: &str = "article:topic-guide";
pub const TAG_TWO_COLUMNS: &str = "columns:two";
pub const TAG_COVER_PAGE: &str = "coverpage:yes";
pub const TAG_COVER_PAGE_NO_COMMONS: &str = "coverpage:nocommons";
pub const TAG_NO_HEADER: &str = "printoptions:no-header";
pub const TAG_NO_HEADER_TITLE: &str = "printoptions:no-header-title";
pub const TAG_HIDE_SOLUTIONS: &str = "hidetop:solutions";

pub const FRONT_MATTER_TITLE: &str = "Front Matter";
pub const BACK_MATTER_TITLE: &str = "Back Matter";

/// Identifies a book: the content library plus the root page id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookId {
    pub lib: String,
    pub page_id: u64,
}

impl BookId {
    pub fn new(lib: impl Into<String>, page_id: u64) -> Self {
        Self {
            lib: lib.into(),
            page_id,
        }
    }

    /// Stable key used for checkpoints and scratch directories.
    pub fn job_key(&self) -> String {
        format!("{}-{}", self.lib, self.page_id)
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.lib, self.page_id)
    }
}

/// Which matter section a node lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatterKind {
    Front,
    Back,
}

impl MatterKind {
    pub fn container_title(&self) -> &'static str {
        match self {
            Self::Front => FRONT_MATTER_TITLE,
            Self::Back => BACK_MATTER_TITLE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LicenseInfo {
    pub label: String,
    pub link: String,
    #[serde(default)]
    pub raw: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// Print-only metadata attached to the book root.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrintInfo {
    pub attribution_prefix: Option<String>,
    pub author_name: Option<String>,
    pub company_name: Option<String>,
    pub program_name: Option<String>,
    #[serde(rename = "programURL")]
    pub program_url: Option<String>,
    pub spine_title: Option<String>,
    pub title: Option<String>,
}

/// One page in the content tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentNode {
    pub id: u64,
    pub lib: String,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub subdomain: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub license: Option<LicenseInfo>,
    #[serde(default)]
    pub matter_type: Option<MatterKind>,
    #[serde(default)]
    pub print_info: PrintInfo,
    #[serde(default, rename = "subpages")]
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    pub fn book_id(&self) -> BookId {
        BookId::new(self.lib.clone(), self.id)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    pub fn is_category_or_guide(&self) -> bool {
        self.has_tag(TAG_CATEGORY) || self.has_tag(TAG_GUIDE)
    }

    pub fn is_cover_page(&self) -> bool {
        self.has_tag(TAG_COVER_PAGE) || self.has_tag(TAG_COVER_PAGE_NO_COMMONS)
    }

    /// True for the structural "Front Matter" / "Back Matter" containers.
    pub fn is_matter_container(&self) -> bool {
        self.title.contains(FRONT_MATTER_TITLE) || self.title.contains(BACK_MATTER_TITLE)
    }

    /// Find the direct child acting as the given matter container.
    pub fn matter_section(&self, kind: MatterKind) -> Option<&ContentNode> {
        self.children
            .iter()
            .find(|c| c.title.contains(kind.container_title()))
    }

    /// Title prefix such as `1.2.` for a page titled `1.2: Atoms`.
    pub fn title_prefix(&self) -> Option<String> {
        let (prefix, _) = self.title.split_once(':')?;
        let prefix = prefix.trim();
        if prefix.is_empty() || prefix.contains(' ') {
            return None;
        }
        Some(format!("{}.", prefix))
    }

    /// Title with any numeric prefix removed.
    pub fn bare_title(&self) -> &str {
        match self.title_prefix() {
            Some(_) => self
                .title
                .split_once(':')
                .map(|(_, rest)| rest.trim())
                .unwrap_or(&self.title),
            None => &self.title,
        }
    }

    /// Book title for print surfaces, preferring print metadata.
    pub fn print_title(&self) -> &str {
        self.print_info.title.as_deref().unwrap_or(&self.title)
    }

    /// Depth-first count of nodes including this one.
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: u64, title: &str) -> ContentNode {
        ContentNode {
            id,
            lib: "chem".to_string(),
            title: title.to_string(),
            url: format!("https://chem.example.org/{}", id),
            subdomain: "chem".to_string(),
            summary: String::new(),
            tags: Vec::new(),
            license: None,
            matter_type: None,
            print_info: PrintInfo::default(),
            children: Vec::new(),
        }
    }

    #[test]
    fn test_title_prefix() {
        assert_eq!(node(1, "1.2: Atoms").title_prefix().as_deref(), Some("1.2."));
        assert_eq!(node(1, "1.2: Atoms").bare_title(), "Atoms");
        assert_eq!(node(1, "Atoms").title_prefix(), None);
        assert_eq!(node(1, "Note to readers: hello").title_prefix(), None);
    }

    #[test]
    fn test_matter_detection() {
        let mut root = node(1, "Book");
        root.children.push(node(2, "Front Matter"));
        root.children.push(node(3, "1: Intro"));

        assert!(root.children[0].is_matter_container());
        assert!(root.matter_section(MatterKind::Front).is_some());
        assert!(root.matter_section(MatterKind::Back).is_none());
        assert_eq!(root.node_count(), 3);
    }

    #[test]
    fn test_deserialize_snapshot_fields() {
        let json = r#"{
            "id": 7, "lib": "bio", "title": "Cells", "url": "https://bio.example.org/Cells",
            "tags": ["article:topic-guide"], "matterType": "Back",
            "printInfo": {"authorName": "A. Author", "programURL": "https://example.org"},
            "subpages": [{"id": 8, "lib": "bio", "title": "x", "url": "u"}]
        }"#;
        let parsed: ContentNode = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.matter_type, Some(MatterKind::Back));
        assert!(parsed.is_category_or_guide());
        assert_eq!(parsed.print_info.author_name.as_deref(), Some("A. Author"));
        assert_eq!(parsed.print_info.program_url.as_deref(), Some("https://example.org"));
        assert_eq!(parsed.children.len(), 1);
        assert_eq!(parsed.book_id().job_key(), "bio-7");
    }
}
