//! Print decoration: header/footer, page stylesheet and cover markup.

use askama::Template;

use crate::models::{ContentNode, TAG_HIDE_SOLUTIONS, TAG_NO_HEADER, TAG_NO_HEADER_TITLE};
use crate::render::{
    HeaderFooter, ListingInjection, PageRenderRequest, Viewport, DEFAULT_RENDER_TIMEOUT,
};

use super::tasks::{ConversionTask, DirectoryHeading, TaskKind};

pub const MAIN_COLOR: &str = "#127BC4";

/// Page margins when a running header/footer is printed.
const PAGE_MARGINS: &str = "0.75in 0.625in 0.9in";

#[derive(Template)]
#[template(path = "print/header.html")]
struct HeaderTemplate<'a> {
    title: &'a str,
    color: &'a str,
}

#[derive(Template)]
#[template(path = "print/footer.html")]
struct FooterTemplate<'a> {
    color: &'a str,
    has_license: bool,
    license_label: &'a str,
    license_link: &'a str,
    attribution: &'a str,
    page_prefix: &'a str,
    page_link: &'a str,
}

#[derive(Template)]
#[template(path = "print/page.css", escape = "none")]
struct PageStyleTemplate<'a> {
    main_toc: bool,
    show_headers: bool,
    margins: &'a str,
    listing_styles: bool,
    hide_solutions: bool,
    color: &'a str,
}

#[derive(Template)]
#[template(path = "print/cover.html")]
pub(crate) struct CoverTemplate<'a> {
    pub title: &'a str,
    pub author: &'a str,
    pub summary: &'a str,
    pub spine_title: &'a str,
    pub color: &'a str,
    pub width_in: f64,
    pub height_in: f64,
    pub spine_width_in: f64,
    pub show_back: bool,
    pub show_spine: bool,
    pub extra_padding: bool,
}

/// Static inputs shared by every page of a book.
#[derive(Debug, Clone)]
pub struct PrintContext {
    pub book_title: String,
    pub viewport: Viewport,
    pub blocked_url_fragments: Vec<String>,
}

impl PrintContext {
    pub fn for_book(root: &ContentNode, viewport: Viewport, blocked: Vec<String>) -> Self {
        Self {
            book_title: root.print_title().to_string(),
            viewport,
            blocked_url_fragments: blocked,
        }
    }
}

/// Build the render request for one task.
pub fn page_request(
    task: &ConversionTask,
    ctx: &PrintContext,
) -> Result<PageRenderRequest, askama::Error> {
    let node = &task.source.node;
    let main_toc = task.kind == TaskKind::Toc && node.is_cover_page();
    let show_headers =
        main_toc || !(node.has_tag(TAG_NO_HEADER) || node.has_tag(TAG_NO_HEADER_TITLE));

    let header_footer = if show_headers {
        let header = HeaderTemplate {
            title: &ctx.book_title,
            color: MAIN_COLOR,
        }
        .render()?;
        let footer = if task.kind == TaskKind::Toc {
            footer_html(None, "")?
        } else {
            footer_html(Some(node), &node.title_prefix().unwrap_or_default())?
        };
        Some(HeaderFooter { header, footer })
    } else {
        None
    };

    let stylesheet = PageStyleTemplate {
        main_toc,
        show_headers,
        margins: PAGE_MARGINS,
        listing_styles: !main_toc,
        hide_solutions: node.has_tag(TAG_HIDE_SOLUTIONS),
        color: MAIN_COLOR,
    }
    .render()?;

    let listing = task.source.listing.as_ref().map(|l| ListingInjection {
        html: l.html.clone(),
        heading: l.heading.map(|h| h.label().to_string()),
        remove_title: l.heading == Some(DirectoryHeading::TableOfContents),
    });

    Ok(PageRenderRequest {
        url: task.source.fetch_url.clone(),
        canonical_url: node.url.clone(),
        blocked_url_fragments: ctx.blocked_url_fragments.clone(),
        viewport: ctx.viewport,
        listing,
        stylesheet,
        header_footer,
        timeout: DEFAULT_RENDER_TIMEOUT,
    })
}

fn footer_html(node: Option<&ContentNode>, prefix: &str) -> Result<String, askama::Error> {
    let license = node.and_then(|n| n.license.as_ref());
    let attribution = node.map(attribution_line).unwrap_or_default();
    FooterTemplate {
        color: MAIN_COLOR,
        has_license: license.is_some(),
        license_label: license.map(|l| l.label.as_str()).unwrap_or(""),
        license_link: license.map(|l| l.link.as_str()).unwrap_or(""),
        attribution: &attribution,
        page_prefix: prefix,
        page_link: node.map(|n| n.url.as_str()).unwrap_or(""),
    }
    .render()
}

/// "Prefix Program" style attribution from print metadata, if any.
fn attribution_line(node: &ContentNode) -> String {
    let info = &node.print_info;
    let Some(program) = info.program_name.as_deref().or(info.company_name.as_deref()) else {
        return String::new();
    };
    match info.attribution_prefix.as_deref() {
        Some(prefix) if !prefix.is_empty() => format!("{} {}", prefix, program),
        _ => program.to_string(),
    }
}

/// Minimal HTML escaping for text and attribute values.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}
