//! HTML metadata extraction.

use scraper::{Html, Selector};

/// Metadata harvested from a page's `<head>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMeta {
    pub title: String,
    pub description: String,
    /// Raw `<meta name="keywords">` content, still comma-delimited.
    pub keywords: String,
    pub og_title: String,
    pub og_description: String,
}

/// Extract title, description, keywords, and Open Graph fields from `html`.
///
/// The first `<title>` wins. Attribute values are matched case-insensitively
/// (`name="Description"` counts) and the last matching `<meta>` wins.
pub fn parse_page(html: &str) -> PageMeta {
    let doc = Html::parse_document(html);
    let mut meta = PageMeta::default();

    let title_sel = Selector::parse("title").unwrap();
    if let Some(el) = doc.select(&title_sel).next() {
        meta.title = el.text().collect::<String>().trim().to_string();
    }

    let meta_sel = Selector::parse("meta").unwrap();
    for el in doc.select(&meta_sel) {
        let attrs = el.value();
        let content = || attrs.attr("content").unwrap_or_default().to_string();

        if let Some(name) = attrs.attr("name") {
            if name.eq_ignore_ascii_case("description") {
                meta.description = content();
            } else if name.eq_ignore_ascii_case("keywords") {
                meta.keywords = content();
            }
        }

        if let Some(property) = attrs.attr("property") {
            if property.eq_ignore_ascii_case("og:title") {
                meta.og_title = content();
            } else if property.eq_ignore_ascii_case("og:description") {
                meta.og_description = content();
            }
        }
    }

    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_fields() {
        let html = r#"<!doctype html><html><head>
            <title> Example Domain </title>
            <meta name="description" content="An example page">
            <meta name="keywords" content="a, b ,,c">
            <meta property="og:title" content="OG Example">
            <meta property="og:description" content="OG text">
        </head><body><title>ignored</title></body></html>"#;

        let meta = parse_page(html);
        assert_eq!(meta.title, "Example Domain");
        assert_eq!(meta.description, "An example page");
        assert_eq!(meta.keywords, "a, b ,,c");
        assert_eq!(meta.og_title, "OG Example");
        assert_eq!(meta.og_description, "OG text");
    }

    #[test]
    fn attribute_values_are_case_insensitive() {
        let html = r#"<html><head>
            <meta name="Description" content="abc">
            <META NAME="KEYWORDS" CONTENT="x,y">
            <meta property="OG:Title" content="Mixed">
        </head></html>"#;

        let meta = parse_page(html);
        assert_eq!(meta.description, "abc");
        assert_eq!(meta.keywords, "x,y");
        assert_eq!(meta.og_title, "Mixed");
    }

    #[test]
    fn last_meta_wins() {
        let html = r#"<html><head>
            <meta name="description" content="first">
            <meta name="description" content="second">
        </head></html>"#;
        assert_eq!(parse_page(html).description, "second");
    }

    #[test]
    fn missing_fields_stay_empty() {
        let meta = parse_page("<html><body><p>no head</p></body></html>");
        assert_eq!(meta, PageMeta::default());
        assert_eq!(parse_page("").title, "");
    }
}
