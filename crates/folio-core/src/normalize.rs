//! Raw catalog record -> canonical flat record.

use crate::{NormalizedRecord, RawCatalogRecord, VolumeInfo};

pub const DESCRIPTION_MAX_CHARS: usize = 500;

const ISBN_10: &str = "ISBN_10";
const ISBN_13: &str = "ISBN_13";

/// Title-case the way the catalog cleaner always has: a cased character is
/// upper-cased when the previous character was uncased, lower-cased otherwise.
/// Digits and punctuation are uncased, so `"1st"` becomes `"1St"`.
pub fn title_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut prev_cased = false;
    for ch in input.chars() {
        let cased = ch.is_lowercase() || ch.is_uppercase();
        if cased {
            if prev_cased {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
        } else {
            out.push(ch);
        }
        prev_cased = cased;
    }
    out
}

fn truncate_chars(input: &str, max_chars: usize) -> String {
    match input.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => input[..byte_idx].to_string(),
        None => input.to_string(),
    }
}

fn volume_text(
    volume: Option<&VolumeInfo>,
    pick: impl Fn(&VolumeInfo) -> Option<&String>,
) -> String {
    volume.and_then(pick).cloned().unwrap_or_default()
}

pub fn normalize(raw: &RawCatalogRecord) -> NormalizedRecord {
    let volume = raw.volume_info.as_ref();
    let sale = raw.sale_info.as_ref();
    let price = sale.and_then(|s| s.retail_price.as_ref());

    let mut isbn_10 = String::new();
    let mut isbn_13 = String::new();
    for identifier in volume
        .and_then(|v| v.industry_identifiers.as_deref())
        .unwrap_or_default()
    {
        let value = identifier.identifier.clone().unwrap_or_default();
        match identifier.kind.as_deref() {
            Some(ISBN_13) => isbn_13 = value,
            Some(ISBN_10) => isbn_10 = value,
            _ => {}
        }
    }

    let authors = volume
        .and_then(|v| v.authors.as_deref())
        .unwrap_or_default()
        .iter()
        .map(|author| title_case(author.trim()))
        .collect::<Vec<_>>()
        .join(", ");

    let categories = volume
        .and_then(|v| v.categories.as_deref())
        .unwrap_or_default()
        .join(", ");

    let thumbnail_link = raw
        .image_links
        .as_ref()
        .or_else(|| volume.and_then(|v| v.image_links.as_ref()))
        .and_then(|links| links.thumbnail.clone())
        .unwrap_or_default();

    NormalizedRecord {
        id: raw.id.clone().unwrap_or_default(),
        title: title_case(volume_text(volume, |v| v.title.as_ref()).trim()),
        subtitle: volume_text(volume, |v| v.subtitle.as_ref()),
        authors,
        publisher: volume_text(volume, |v| v.publisher.as_ref()),
        published_date: volume_text(volume, |v| v.published_date.as_ref()),
        description: truncate_chars(
            &volume_text(volume, |v| v.description.as_ref()),
            DESCRIPTION_MAX_CHARS,
        ),
        categories,
        page_count: volume.and_then(|v| v.page_count).unwrap_or(0),
        average_rating: volume.and_then(|v| v.average_rating),
        ratings_count: volume.and_then(|v| v.ratings_count).unwrap_or(0),
        language: volume_text(volume, |v| v.language.as_ref()),
        isbn_10,
        isbn_13,
        info_link: volume_text(volume, |v| v.info_link.as_ref()),
        buy_link: sale.and_then(|s| s.buy_link.clone()).unwrap_or_default(),
        retail_price: price.and_then(|p| p.amount),
        currency_code: price
            .and_then(|p| p.currency_code.clone())
            .unwrap_or_default(),
        thumbnail_link,
        is_ebook: sale.and_then(|s| s.is_ebook).unwrap_or(false),
        genre: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ImageLinks, IndustryIdentifier, RetailPrice, SaleInfo};

    fn identifier(kind: &str, value: &str) -> IndustryIdentifier {
        IndustryIdentifier {
            kind: Some(kind.to_string()),
            identifier: Some(value.to_string()),
        }
    }

    #[test]
    fn missing_substructures_fall_back_to_defaults() {
        let record = normalize(&RawCatalogRecord::default());
        assert_eq!(record, NormalizedRecord::default());
        assert_eq!(record.page_count, 0);
        assert_eq!(record.average_rating, None);
        assert!(!record.is_ebook);
        assert!(record.authors.is_empty());
    }

    #[test]
    fn title_and_authors_are_trimmed_and_title_cased() {
        let raw = RawCatalogRecord {
            id: Some("vol-1".into()),
            volume_info: Some(VolumeInfo {
                title: Some("  the LORD of the rings ".into()),
                authors: Some(vec![" j.r.r. tolkien".into(), "CHRISTOPHER tolkien  ".into()]),
                categories: Some(vec!["Fiction".into(), "Fantasy".into()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let record = normalize(&raw);
        assert_eq!(record.id, "vol-1");
        assert_eq!(record.title, "The Lord Of The Rings");
        assert_eq!(record.authors, "J.R.R. Tolkien, Christopher Tolkien");
        assert_eq!(record.categories, "Fiction, Fantasy");
    }

    #[test]
    fn title_case_treats_digits_and_apostrophes_as_uncased() {
        assert_eq!(title_case("don't stop"), "Don'T Stop");
        assert_eq!(title_case("1st edition"), "1St Edition");
        assert_eq!(title_case("non fiction"), "Non Fiction");
        assert_eq!(title_case(""), "");
    }

    #[test]
    fn last_identifier_of_each_type_wins() {
        let raw = RawCatalogRecord {
            volume_info: Some(VolumeInfo {
                industry_identifiers: Some(vec![
                    identifier("ISBN_13", "111"),
                    identifier("ISBN_10", "222"),
                    identifier("OTHER", "ignored"),
                    identifier("ISBN_13", "333"),
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let record = normalize(&raw);
        assert_eq!(record.isbn_13, "333");
        assert_eq!(record.isbn_10, "222");
    }

    #[test]
    fn description_is_cut_at_500_characters() {
        let long = "é".repeat(620);
        let raw = RawCatalogRecord {
            volume_info: Some(VolumeInfo {
                description: Some(long),
                ..Default::default()
            }),
            ..Default::default()
        };
        let record = normalize(&raw);
        assert_eq!(record.description.chars().count(), DESCRIPTION_MAX_CHARS);
    }

    #[test]
    fn sale_fields_and_thumbnail_are_carried_over() {
        let raw = RawCatalogRecord {
            volume_info: Some(VolumeInfo {
                image_links: Some(ImageLinks {
                    thumbnail: Some("http://nested/thumb".into()),
                }),
                ..Default::default()
            }),
            sale_info: Some(SaleInfo {
                is_ebook: Some(true),
                retail_price: Some(RetailPrice {
                    amount: Some(12.5),
                    currency_code: Some("EUR".into()),
                }),
                buy_link: Some("http://buy".into()),
            }),
            image_links: None,
            id: None,
        };
        let record = normalize(&raw);
        assert!(record.is_ebook);
        assert_eq!(record.retail_price, Some(12.5));
        assert_eq!(record.currency_code, "EUR");
        assert_eq!(record.buy_link, "http://buy");
        assert_eq!(record.thumbnail_link, "http://nested/thumb");
    }

    #[test]
    fn top_level_image_links_take_precedence() {
        let raw = RawCatalogRecord {
            volume_info: Some(VolumeInfo {
                image_links: Some(ImageLinks {
                    thumbnail: Some("http://nested".into()),
                }),
                ..Default::default()
            }),
            image_links: Some(ImageLinks {
                thumbnail: Some("http://top".into()),
            }),
            ..Default::default()
        };
        assert_eq!(normalize(&raw).thumbnail_link, "http://top");
    }
}
