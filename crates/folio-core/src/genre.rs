use once_cell::sync::Lazy;
use regex::Regex;

use crate::normalize::title_case;

pub const UNKNOWN_GENRE: &str = "unknown";

static BATCH_LABEL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^google_books_(.+?)_page").expect("valid batch label regex"));

/// Derive the display genre from a staged batch label such as
/// `google_books_non_fiction_page_2`.
pub fn tag_genre(batch_label: &str) -> String {
    let Some(captures) = BATCH_LABEL_REGEX.captures(batch_label) else {
        return UNKNOWN_GENRE.to_string();
    };
    let raw = captures[1].replace('_', " ");
    title_case(&raw).replace(" And ", " and ")
}
