//! Data models for jobs and the content trees they convert.

mod content;
mod job;

pub use content::{
    BookId, ContentNode, LicenseInfo, MatterKind, PrintInfo, BACK_MATTER_TITLE,
    FRONT_MATTER_TITLE, TAG_CATEGORY, TAG_COVER_PAGE, TAG_COVER_PAGE_NO_COMMONS, TAG_GUIDE,
    TAG_HIDE_SOLUTIONS, TAG_NO_HEADER, TAG_NO_HEADER_TITLE, TAG_TWO_COLUMNS,
};
pub use job::{Job, JobStatus, NewJob};
