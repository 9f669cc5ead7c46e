//! Cover variants and their physical dimensions.

use askama::Template;

use crate::models::ContentNode;
use crate::render::{HtmlRenderRequest, DEFAULT_RENDER_TIMEOUT};

use super::templates::{CoverTemplate, MAIN_COLOR};

/// Amazon spine thickness per page, in inches.
const AMAZON_SPINE_PER_PAGE: f64 = 0.002252;

/// Case-wrap spine widths by page count. A book uses the last entry whose
/// page count it exceeds.
const CASE_WRAP_SPINE: &[(u32, f64)] = &[
    (24, 0.25),
    (84, 0.5),
    (140, 0.625),
    (169, 0.6875),
    (195, 0.75),
    (223, 0.8125),
    (251, 0.875),
    (279, 0.9375),
    (307, 1.0),
    (335, 1.0625),
    (361, 1.125),
    (388, 1.1875),
    (417, 1.25),
    (445, 1.3125),
    (473, 1.375),
    (501, 1.4375),
    (529, 1.5),
    (557, 1.5625),
    (582, 1.625),
    (611, 1.6875),
    (639, 1.75),
    (667, 1.8125),
    (695, 1.875),
    (723, 1.9375),
    (751, 2.0),
    (779, 2.0625),
    (800, 2.125),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoverVariant {
    Amazon,
    CaseWrap,
    CoilBound,
    Main,
    PerfectBound,
}

impl CoverVariant {
    pub const ALL: [CoverVariant; 5] = [
        CoverVariant::Amazon,
        CoverVariant::CaseWrap,
        CoverVariant::CoilBound,
        CoverVariant::Main,
        CoverVariant::PerfectBound,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Amazon => "Amazon",
            Self::CaseWrap => "CaseWrap",
            Self::CoilBound => "CoilBound",
            Self::Main => "Main",
            Self::PerfectBound => "PerfectBound",
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.name())
    }

    fn extra_padding(&self) -> bool {
        matches!(self, Self::CaseWrap | Self::CoilBound | Self::PerfectBound)
    }
}

/// Physical size of a rendered cover, in inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoverDimensions {
    pub spine_in: f64,
    pub width_in: f64,
    pub height_in: f64,
}

fn floor_thousandths(value: f64) -> f64 {
    (value * 1000.0).floor() / 1000.0
}

fn perfect_bound(pages: u32) -> (f64, f64) {
    let base = pages as f64 / 444.0 + 0.06;
    (floor_thousandths(base), floor_thousandths(base + 17.25))
}

fn case_wrap_spine(pages: u32) -> Option<f64> {
    CASE_WRAP_SPINE
        .iter()
        .filter(|(threshold, _)| pages > *threshold)
        .last()
        .map(|(_, width)| *width)
}

/// Compute spine and sheet size for `variant` from the content page count.
pub fn dimensions(variant: CoverVariant, pages: u32) -> CoverDimensions {
    let wrap_height = 11.25;
    match variant {
        CoverVariant::Main => CoverDimensions {
            spine_in: 0.0,
            width_in: 8.5,
            height_in: 11.0,
        },
        CoverVariant::CoilBound => CoverDimensions {
            spine_in: 0.0,
            width_in: 17.25,
            height_in: wrap_height,
        },
        CoverVariant::Amazon => {
            let spine = pages as f64 * AMAZON_SPINE_PER_PAGE;
            CoverDimensions {
                spine_in: spine,
                width_in: spine + 0.375 + 17.0,
                height_in: wrap_height,
            }
        }
        CoverVariant::CaseWrap => {
            let (spine, width) = match case_wrap_spine(pages) {
                Some(spine) => (spine, spine + 18.75),
                None => perfect_bound(pages),
            };
            CoverDimensions {
                spine_in: spine,
                width_in: width,
                height_in: 12.75,
            }
        }
        CoverVariant::PerfectBound => {
            let (spine, width) = perfect_bound(pages);
            CoverDimensions {
                spine_in: spine,
                width_in: width,
                height_in: wrap_height,
            }
        }
    }
}

/// Build the HTML print request for one cover of `book`.
pub fn cover_request(
    variant: CoverVariant,
    book: &ContentNode,
    pages: u32,
) -> Result<HtmlRenderRequest, askama::Error> {
    let dims = dimensions(variant, pages);
    let wraps = variant != CoverVariant::Main;
    let info = &book.print_info;
    let title = book.print_title();

    let html = CoverTemplate {
        title,
        author: info.author_name.as_deref().unwrap_or(""),
        summary: &book.summary,
        spine_title: info.spine_title.as_deref().unwrap_or(title),
        color: MAIN_COLOR,
        width_in: dims.width_in,
        height_in: dims.height_in,
        spine_width_in: dims.spine_in,
        show_back: wraps,
        show_spine: wraps && variant != CoverVariant::CoilBound,
        extra_padding: variant.extra_padding(),
    }
    .render()?;

    Ok(HtmlRenderRequest {
        html,
        width_in: dims.width_in,
        height_in: dims.height_in,
        timeout: DEFAULT_RENDER_TIMEOUT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PrintInfo;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_amazon_is_linear_in_pages() {
        let d = dimensions(CoverVariant::Amazon, 400);
        assert!(approx(d.spine_in, 0.9008));
        assert!(approx(d.width_in, 0.9008 + 17.375));
        assert!(approx(d.height_in, 11.25));
    }

    #[test]
    fn test_case_wrap_breakpoints() {
        assert!(approx(dimensions(CoverVariant::CaseWrap, 25).spine_in, 0.25));
        assert!(approx(dimensions(CoverVariant::CaseWrap, 84).spine_in, 0.25));
        assert!(approx(dimensions(CoverVariant::CaseWrap, 85).spine_in, 0.5));
        let big = dimensions(CoverVariant::CaseWrap, 950);
        assert!(approx(big.spine_in, 2.125));
        assert!(approx(big.width_in, 20.875));
        assert!(approx(big.height_in, 12.75));
    }

    #[test]
    fn test_case_wrap_below_table_falls_back_to_formula() {
        let d = dimensions(CoverVariant::CaseWrap, 10);
        assert!(approx(d.spine_in, 0.082));
        assert!(approx(d.width_in, 17.332));
    }

    #[test]
    fn test_perfect_bound_and_fixed_widths() {
        let d = dimensions(CoverVariant::PerfectBound, 444);
        assert!(approx(d.spine_in, 1.06));
        assert!(approx(d.width_in, 18.31));

        let coil = dimensions(CoverVariant::CoilBound, 444);
        assert!(approx(coil.width_in, 17.25));
        assert!(approx(coil.spine_in, 0.0));

        let main = dimensions(CoverVariant::Main, 444);
        assert!(approx(main.width_in, 8.5));
        assert!(approx(main.height_in, 11.0));
    }

    #[test]
    fn test_cover_request_layout() {
        let book = ContentNode {
            id: 1,
            lib: "chem".to_string(),
            title: "Chemistry".to_string(),
            url: "https://chem.example.org/Book".to_string(),
            subdomain: "chem".to_string(),
            summary: "An introduction.".to_string(),
            tags: Vec::new(),
            license: None,
            matter_type: None,
            print_info: PrintInfo {
                author_name: Some("Ada Author".to_string()),
                ..Default::default()
            },
            children: Vec::new(),
        };

        let main = cover_request(CoverVariant::Main, &book, 100).unwrap();
        assert!(main.html.contains("Ada Author"));
        assert!(!main.html.contains("class=\"spine\""));
        assert!(!main.html.contains("An introduction."));

        let coil = cover_request(CoverVariant::CoilBound, &book, 100).unwrap();
        assert!(coil.html.contains("An introduction."));
        assert!(!coil.html.contains("class=\"spine\""));

        let perfect = cover_request(CoverVariant::PerfectBound, &book, 100).unwrap();
        assert!(perfect.html.contains("class=\"spine\""));
        assert!(perfect.html.contains("117px 50px"));
    }
}
