//! Deterministic decomposition of a content tree into conversion tasks.
//!
//! Output keys sort into reading order: front matter uses the `0000:` prefix,
//! back matter `9999:`, everything else the 4-digit position at which the
//! node was visited. Positions above [`MAX_ORDERED_POSITION`] collide with
//! the back matter prefix and sort after it.

use tracing::warn;

use crate::models::{
    ContentNode, MatterKind, BACK_MATTER_TITLE, FRONT_MATTER_TITLE, TAG_GUIDE, TAG_TWO_COLUMNS,
};

use super::templates::escape_html;

const FRONT_MATTER_PREFIX: &str = "0000";
const BACK_MATTER_PREFIX: &str = "9999";

/// Last body position that still sorts before back matter.
pub const MAX_ORDERED_POSITION: usize = 9998;

/// Front matter pages that never appear in a directory listing.
const LISTING_EXCLUDED_FRONT_MATTER: [&str; 3] = ["TitlePage", "InfoPage", "Table of Contents"];

/// Path of the rendered table of contents under a book's cover page.
const MAIN_TOC_PATH: &str = "00:_Front_Matter/03:_Table_of_Contents";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Page,
    Toc,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Toc => "toc",
        }
    }
}

/// Heading shown above an injected directory listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectoryHeading {
    TableOfContents,
    ChapterOverview,
    SectionOverview,
}

impl DirectoryHeading {
    pub fn label(&self) -> &'static str {
        match self {
            Self::TableOfContents => "Table of Contents",
            Self::ChapterOverview => "Chapter Overview",
            Self::SectionOverview => "Section Overview",
        }
    }

    fn for_node(node: &ContentNode) -> Self {
        if node.is_cover_page() || node.title.contains("Table of Contents") {
            Self::TableOfContents
        } else if node.has_tag(TAG_GUIDE) {
            Self::ChapterOverview
        } else {
            Self::SectionOverview
        }
    }
}

/// Listing markup that replaces the page's own directory block.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryListing {
    pub html: String,
    pub heading: Option<DirectoryHeading>,
}

/// What to fetch and how to decorate it.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSource {
    /// The node this task renders. Children are stripped.
    pub node: ContentNode,
    /// Document to navigate to.
    pub fetch_url: String,
    pub listing: Option<DirectoryListing>,
}

/// One unit of conversion work.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversionTask {
    pub id: String,
    pub kind: TaskKind,
    pub output_key: String,
    pub source: TaskSource,
}

/// Build the ordered task list for a content tree.
///
/// Calling this twice on the same tree yields identical lists.
pub fn build_task_list(root: &ContentNode) -> Vec<ConversionTask> {
    let mut builder = TaskListBuilder::default();
    builder.visit(root);
    builder.tasks
}

#[derive(Default)]
struct TaskListBuilder {
    tasks: Vec<ConversionTask>,
    front_matter_seen: u32,
    back_matter_seen: u32,
}

impl TaskListBuilder {
    fn visit(&mut self, node: &ContentNode) {
        let index = self.tasks.len() + 1;
        if index == MAX_ORDERED_POSITION + 1 {
            warn!(
                "{}-{}: more than {} tasks, later pages will merge after back matter",
                node.lib, node.id, MAX_ORDERED_POSITION
            );
        }
        let position = format!("{:04}", index);
        let node_key = format!("{}-{}", node.lib, node.id);

        if is_toc_node(node) {
            self.tasks.push(toc_task(node, &position, &node_key));
        } else if !node.is_matter_container() {
            let prefix = match node.matter_type {
                Some(MatterKind::Front) => {
                    self.front_matter_seen += 1;
                    format!("{}:{}", FRONT_MATTER_PREFIX, self.front_matter_seen)
                }
                Some(MatterKind::Back) => {
                    self.back_matter_seen += 1;
                    format!("{}:{}", BACK_MATTER_PREFIX, self.back_matter_seen)
                }
                None => position,
            };

            self.tasks.push(ConversionTask {
                id: format!("page-{}", node_key),
                kind: TaskKind::Page,
                output_key: format!("{}_{}", prefix, node_key),
                source: TaskSource {
                    node: detached(node),
                    fetch_url: node.url.clone(),
                    listing: directory_listing(node),
                },
            });
        }

        for child in &node.children {
            self.visit(child);
        }
    }
}

fn is_toc_node(node: &ContentNode) -> bool {
    node.children.len() > 1 && node.is_category_or_guide() && !node.is_matter_container()
}

fn toc_task(node: &ContentNode, position: &str, node_key: &str) -> ConversionTask {
    let (fetch_url, listing) = if node.is_cover_page() {
        let base = node.url.trim_end_matches('/');
        (format!("{}/{}", base, MAIN_TOC_PATH), None)
    } else {
        (node.url.clone(), directory_listing(node))
    };

    ConversionTask {
        id: format!("toc-{}", node_key),
        kind: TaskKind::Toc,
        output_key: format!("{}_TOC", position),
        source: TaskSource {
            node: detached(node),
            fetch_url,
            listing,
        },
    }
}

fn detached(node: &ContentNode) -> ContentNode {
    ContentNode {
        children: Vec::new(),
        ..node.clone()
    }
}

fn directory_listing(node: &ContentNode) -> Option<DirectoryListing> {
    let html = listing_level(node, 2)?;
    let heading = (!node.tags.is_empty()).then(|| DirectoryHeading::for_node(node));
    Some(DirectoryListing { html, heading })
}

/// Nested `<ul>` of a node's descendants. `None` for leaf nodes.
pub fn listing_level(node: &ContentNode, level: u32) -> Option<String> {
    if node.children.is_empty() {
        return None;
    }

    let mut entries: Vec<&ContentNode> = Vec::new();
    for child in &node.children {
        if child.title == FRONT_MATTER_TITLE {
            entries.extend(
                child
                    .children
                    .iter()
                    .filter(|c| !LISTING_EXCLUDED_FRONT_MATTER.contains(&c.title.as_str())),
            );
        } else if child.title == BACK_MATTER_TITLE {
            entries.extend(child.children.iter());
        } else {
            entries.push(child);
        }
    }

    let level = if level == 2 && node.has_tag(TAG_GUIDE) {
        3
    } else {
        level
    };
    let two_column = node.has_tag(TAG_TWO_COLUMNS) && node.is_cover_page() && level == 2;
    let heading_tag = if level == 2 { "h2" } else { "h" };

    let mut inner = String::new();
    for entry in entries {
        if entry.url.is_empty() || entry.title.is_empty() {
            continue;
        }
        let nested = listing_level(entry, level + 1);

        let mut classes = vec!["nobreak".to_string()];
        if level > 2 {
            classes.push(format!("indent{}", level - 2));
        }
        if nested.is_some() {
            classes.push(format!("libre-print-sublisting{}", level - 2));
        }

        inner.push_str(&format!(
            "<li><div class=\"{}\"><{tag}><a href=\"{}\">{}</a></{tag}></div>{}</li>",
            classes.join(" "),
            escape_html(&entry.url),
            escape_html(&entry.title),
            nested.unwrap_or_default(),
            tag = heading_tag,
        ));
    }

    let style = if two_column {
        " style=\"column-count: 2;\""
    } else {
        ""
    };
    Some(format!("<ul class='libre-print-list'{}>{}</ul>", style, inner))
}
