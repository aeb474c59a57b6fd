//! Core domain model and the pure transform engine for Folio.

use serde::{Deserialize, Serialize};

pub mod aggregate;
pub mod dedup;
pub mod genre;
pub mod normalize;
pub mod similarity;

pub use aggregate::{count_by_genre, GenreCount};
pub use dedup::{deduplicate, DedupEngine, DedupOutcome, DuplicateMatch};
pub use genre::{tag_genre, UNKNOWN_GENRE};
pub use normalize::{normalize, title_case};
pub use similarity::{
    main_title, token_sort_ratio, JaroWinklerScorer, MainTitleScorer, SimilarityJudge,
    TitleScorer, TitleScorerKind, TokenSortScorer, DUPLICATE_THRESHOLD,
};

pub const CRATE_NAME: &str = "folio-core";

/// One staged page as returned by the catalog `volumes` endpoint.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CatalogPage {
    #[serde(default)]
    pub items: Vec<RawCatalogRecord>,
}

/// Catalog book entry. Every level is optional; the normalizer supplies defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCatalogRecord {
    pub id: Option<String>,
    pub volume_info: Option<VolumeInfo>,
    pub sale_info: Option<SaleInfo>,
    pub image_links: Option<ImageLinks>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeInfo {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub authors: Option<Vec<String>>,
    pub publisher: Option<String>,
    pub published_date: Option<String>,
    pub description: Option<String>,
    pub industry_identifiers: Option<Vec<IndustryIdentifier>>,
    pub page_count: Option<u32>,
    pub categories: Option<Vec<String>>,
    pub average_rating: Option<f64>,
    pub ratings_count: Option<u32>,
    pub language: Option<String>,
    pub info_link: Option<String>,
    pub image_links: Option<ImageLinks>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndustryIdentifier {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaleInfo {
    pub is_ebook: Option<bool>,
    pub retail_price: Option<RetailPrice>,
    pub buy_link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetailPrice {
    pub amount: Option<f64>,
    pub currency_code: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageLinks {
    pub thumbnail: Option<String>,
}

/// Canonical flat book row. Field order is the column order of the cleaned CSV
/// and the `books` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub authors: String,
    pub publisher: String,
    pub published_date: String,
    pub description: String,
    pub categories: String,
    pub page_count: u32,
    pub average_rating: Option<f64>,
    pub ratings_count: u32,
    pub language: String,
    pub isbn_10: String,
    pub isbn_13: String,
    pub info_link: String,
    pub buy_link: String,
    pub retail_price: Option<f64>,
    pub currency_code: String,
    pub thumbnail_link: String,
    pub is_ebook: bool,
    #[serde(default)]
    pub genre: String,
}

impl NormalizedRecord {
    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = genre.into();
        self
    }
}

/// Column names of the tabular output, in order.
pub const RECORD_COLUMNS: [&str; 21] = [
    "id",
    "title",
    "subtitle",
    "authors",
    "publisher",
    "published_date",
    "description",
    "categories",
    "page_count",
    "average_rating",
    "ratings_count",
    "language",
    "isbn_10",
    "isbn_13",
    "info_link",
    "buy_link",
    "retail_price",
    "currency_code",
    "thumbnail_link",
    "is_ebook",
    "genre",
];

/// Deduplicated records in first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeduplicatedBatch {
    records: Vec<NormalizedRecord>,
}

impl DeduplicatedBatch {
    pub(crate) fn from_accepted(records: Vec<NormalizedRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<NormalizedRecord> {
        self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, NormalizedRecord> {
        self.records.iter()
    }
}

impl<'a> IntoIterator for &'a DeduplicatedBatch {
    type Item = &'a NormalizedRecord;
    type IntoIter = std::slice::Iter<'a, NormalizedRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_page_without_items_is_empty() {
        let page: CatalogPage =
            serde_json::from_str(r#"{"kind":"books#volumes","totalItems":0}"#).expect("page");
        assert!(page.items.is_empty());
    }

    #[test]
    fn raw_record_reads_catalog_field_names() {
        let raw: RawCatalogRecord = serde_json::from_str(
            r#"{
                "id": "abc123",
                "volumeInfo": {
                    "title": "dune",
                    "authors": ["frank herbert"],
                    "publishedDate": "1965",
                    "pageCount": 412,
                    "industryIdentifiers": [{"type": "ISBN_10", "identifier": "0441013597"}],
                    "imageLinks": {"thumbnail": "http://img/1"}
                },
                "saleInfo": {
                    "isEbook": true,
                    "retailPrice": {"amount": 9.99, "currencyCode": "USD"},
                    "buyLink": "http://buy/1"
                }
            }"#,
        )
        .expect("raw record");

        let volume = raw.volume_info.as_ref().expect("volume info");
        assert_eq!(raw.id.as_deref(), Some("abc123"));
        assert_eq!(volume.page_count, Some(412));
        assert_eq!(volume.published_date.as_deref(), Some("1965"));
        let identifiers = volume.industry_identifiers.as_ref().expect("identifiers");
        assert_eq!(identifiers[0].kind.as_deref(), Some("ISBN_10"));
        let sale = raw.sale_info.as_ref().expect("sale info");
        assert_eq!(sale.is_ebook, Some(true));
        assert_eq!(
            sale.retail_price.as_ref().and_then(|p| p.currency_code.as_deref()),
            Some("USD")
        );
    }
}
