pub mod lecture_visitor;
pub mod page_extractor;

pub use lecture_visitor::{build_lecture_url, has_query_param, LectureVisitor, VisitReport};
pub use page_extractor::{MismatchInfo, PageData, PageExtractor};
