//! Structured extraction of Wikipedia article pages.
//!
//! Turns the raw HTML of a `/wiki/<title>` page into an [`ArticleSummary`]:
//! page title, infobox fields, introduction and the plain paragraph text.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{Map, Value};

const TITLE_NOT_FOUND: &str = "Title not found";
const INFOBOX_NOT_FOUND: &str = "Infobox not found or data extraction failed";
const INTRODUCTION_NOT_FOUND: &str = "First paragraph not reliably found.";
const CONTENT_NOT_FOUND: &str = "Content section not found.";
const FULL_TEXT_NOT_FOUND: &str = "Full text content not found.";

lazy_static::lazy_static! {
    static ref TITLE: Selector = selector("title");
    static ref BIOGRAPHY_INFOBOX: Selector = selector(r#"table[class="infobox biography vcard"]"#);
    static ref INFOBOX: Selector = selector("table.infobox");
    static ref ROW: Selector = selector("tr");
    static ref HEADER_CELL: Selector = selector("th");
    static ref DATA_CELL: Selector = selector("td");
    static ref BIRTH_DATE: Selector = selector("span.bday");
    static ref BIRTH_PLACE: Selector = selector("div.birthplace");
    static ref LIST_ITEM: Selector = selector("li");
    static ref LINK: Selector = selector("a");
    static ref CONTENT: Selector = selector("div#mw-content-text");
    static ref PARAGRAPH: Selector = selector("p");
    static ref HATNOTE: Selector = selector(".hatnote");

    static ref NUMERIC_CITATION: Regex = Regex::new(r"\[\d+\]").expect("valid regex");
    static ref ANY_BRACKETED: Regex = Regex::new(r"\[.*?\]").expect("valid regex");
    static ref COMMA_SPACING: Regex = Regex::new(r"\s*,\s*").expect("valid regex");
}

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector is valid")
}

/// Structured view of one article page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArticleSummary {
    pub requested_url: String,
    pub page_title: String,
    /// Label to value map, or a fallback message when no infobox exists
    pub infobox_data: Value,
    pub introduction: String,
    pub full_text: String,
    /// Length of the article HTML in characters
    pub html_length: usize,
}

/// Extracts an [`ArticleSummary`] from article HTML.
///
/// Missing sections never fail the extraction; they are replaced by fixed
/// fallback messages.
pub fn scrape_article(html: &str, requested_url: &str) -> ArticleSummary {
    let document = Html::parse_document(html);

    let page_title = document
        .select(&TITLE)
        .next()
        .map(|title| title.text().collect::<String>().trim().to_string())
        .unwrap_or_else(|| TITLE_NOT_FOUND.to_string());

    let infobox_data = document
        .select(&BIOGRAPHY_INFOBOX)
        .next()
        .or_else(|| document.select(&INFOBOX).next())
        .map(|infobox| Value::Object(extract_infobox(infobox)))
        .unwrap_or_else(|| Value::String(INFOBOX_NOT_FOUND.to_string()));

    let content = document.select(&CONTENT).next();
    let introduction = match content {
        Some(content) => extract_introduction(content),
        None => CONTENT_NOT_FOUND.to_string(),
    };
    let full_text = match content {
        Some(content) => content
            .select(&PARAGRAPH)
            .map(|p| stripped_text(p, ""))
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        None => FULL_TEXT_NOT_FOUND.to_string(),
    };

    ArticleSummary {
        requested_url: requested_url.to_string(),
        page_title,
        infobox_data,
        introduction,
        full_text,
        html_length: html.chars().count(),
    }
}

/// Text fragments of `element`, each trimmed, empty ones dropped, joined by `separator`.
fn stripped_text(element: ElementRef, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|fragment| !fragment.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

fn extract_infobox(infobox: ElementRef) -> Map<String, Value> {
    let mut fields = Map::new();

    for row in infobox.select(&ROW) {
        let (Some(header), Some(cell)) = (
            row.select(&HEADER_CELL).next(),
            row.select(&DATA_CELL).next(),
        ) else {
            continue;
        };

        let label = stripped_text(header, "");
        let value = match label.as_str() {
            "Born" => {
                let birth_date = cell
                    .select(&BIRTH_DATE)
                    .next()
                    .map(|date| stripped_text(date, ""))
                    .unwrap_or_else(|| "N/A".to_string());
                let birth_place_text = match cell.select(&BIRTH_PLACE).next() {
                    Some(place) => stripped_text(place, ", "),
                    None => stripped_text(cell, ""),
                };
                let birth_place = COMMA_SPACING
                    .replace_all(&birth_place_text, ", ")
                    .trim()
                    .to_string();

                let combined = format!("{}, {}", birth_date, birth_place);
                fields.insert("Birth Date".to_string(), Value::String(birth_date));
                fields.insert("Birth Place".to_string(), Value::String(birth_place));
                Value::String(combined)
            }
            "Occupations" => {
                let occupations: Vec<Value> = cell
                    .select(&LIST_ITEM)
                    .map(|item| Value::String(stripped_text(item, "")))
                    .collect();
                if occupations.is_empty() {
                    Value::String(stripped_text(cell, ""))
                } else {
                    Value::Array(occupations)
                }
            }
            "Years active" => {
                let text = stripped_text(cell, "");
                Value::String(
                    ANY_BRACKETED
                        .replace_all(&text, "")
                        .trim()
                        .replace('\u{2013}', "-"),
                )
            }
            "Family" => Value::String(match cell.select(&LINK).next() {
                Some(link) => stripped_text(link, ""),
                None => stripped_text(cell, ""),
            }),
            _ => Value::String(stripped_text(cell, " ")),
        };

        let is_empty = match &value {
            Value::String(text) => text.is_empty(),
            Value::Array(items) => items.is_empty(),
            _ => false,
        };
        if !is_empty {
            fields.insert(label, value);
        }
    }

    fields
}

/// First non-empty paragraph that is not a hatnote, with citations removed.
fn extract_introduction(content: ElementRef) -> String {
    let mut candidate = content.select(&PARAGRAPH).next();

    while let Some(paragraph) = candidate {
        let is_blank = stripped_text(paragraph, "").is_empty();
        let is_hatnote = paragraph.select(&HATNOTE).next().is_some();
        if !is_blank && !is_hatnote {
            let raw = paragraph.text().collect::<String>();
            let without_citations = NUMERIC_CITATION.replace_all(&raw, "");
            return without_citations
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
        }
        candidate = next_paragraph_sibling(paragraph);
    }

    INTRODUCTION_NOT_FOUND.to_string()
}

fn next_paragraph_sibling(element: ElementRef) -> Option<ElementRef> {
    element
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .find(|sibling| sibling.value().name() == "p")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = r#"<!DOCTYPE html>
<html>
<head><title> Salman Khan - Wikipedia </title></head>
<body>
<table class="infobox biography vcard">
  <tr><th colspan="2">Salman Khan</th></tr>
  <tr><th>Born</th><td>Abdul Rashid Salim Salman Khan<br><span class="bday">1965-12-27</span><div class="birthplace"><a>Indore</a><a>Madhya Pradesh ,India</a></div></td></tr>
  <tr><th>Occupations</th><td><ul><li>Actor</li><li> Film producer </li></ul></td></tr>
  <tr><th>Years active</th><td>1988–present<sup>[2]</sup></td></tr>
  <tr><th>Family</th><td><a>Khan family</a> (see below)</td></tr>
  <tr><th>Relatives</th><td>Alvira Khan <i>Agnihotri</i></td></tr>
  <tr><th>Empty</th><td>   </td></tr>
</table>
<div id="mw-content-text">
  <div>
    <p>   </p>
    <p><span class="hatnote">Not to be confused with another person.</span></p>
    <p>Salman Khan[1] is an   Indian actor[23] and
       film producer.</p>
    <p>He has starred in many films.</p>
  </div>
</div>
</body>
</html>"#;

    #[test]
    fn test_extracts_title_and_length() {
        let summary = scrape_article(ARTICLE, "https://en.wikipedia.org/wiki/Salman_Khan");

        assert_eq!(summary.page_title, "Salman Khan - Wikipedia");
        assert_eq!(summary.requested_url, "https://en.wikipedia.org/wiki/Salman_Khan");
        assert_eq!(summary.html_length, ARTICLE.chars().count());
    }

    #[test]
    fn test_infobox_special_labels() {
        let summary = scrape_article(ARTICLE, "url");
        let infobox = summary.infobox_data.as_object().unwrap();

        assert_eq!(infobox["Birth Date"], "1965-12-27");
        assert_eq!(infobox["Birth Place"], "Indore, Madhya Pradesh, India");
        assert_eq!(infobox["Born"], "1965-12-27, Indore, Madhya Pradesh, India");
        assert_eq!(
            infobox["Occupations"],
            serde_json::json!(["Actor", "Film producer"])
        );
        assert_eq!(infobox["Years active"], "1988-present");
        assert_eq!(infobox["Family"], "Khan family");
        assert_eq!(infobox["Relatives"], "Alvira Khan Agnihotri");
        assert!(!infobox.contains_key("Empty"));
        assert!(!infobox.contains_key("Salman Khan"));
    }

    #[test]
    fn test_introduction_skips_blank_and_hatnote_paragraphs() {
        let summary = scrape_article(ARTICLE, "url");
        assert_eq!(
            summary.introduction,
            "Salman Khan is an Indian actor and film producer."
        );
    }

    #[test]
    fn test_full_text_joins_non_empty_paragraphs() {
        let summary = scrape_article(ARTICLE, "url");
        let paragraphs: Vec<&str> = summary.full_text.split("\n\n").collect();

        assert_eq!(paragraphs.len(), 3);
        assert_eq!(paragraphs[0], "Not to be confused with another person.");
        assert_eq!(paragraphs[2], "He has starred in many films.");
    }

    #[test]
    fn test_missing_sections_use_fallbacks() {
        let summary = scrape_article("<html><body><p>Hello</p></body></html>", "url");

        assert_eq!(summary.page_title, TITLE_NOT_FOUND);
        assert_eq!(summary.infobox_data, Value::String(INFOBOX_NOT_FOUND.to_string()));
        assert_eq!(summary.introduction, CONTENT_NOT_FOUND);
        assert_eq!(summary.full_text, FULL_TEXT_NOT_FOUND);
    }

    #[test]
    fn test_html_length_counts_characters() {
        let html = "<html><head><title>Zoë – Wikipedia</title></head></html>";
        let summary = scrape_article(html, "url");

        assert_eq!(summary.html_length, 56);
        assert!(html.len() > summary.html_length);
    }

    #[test]
    fn test_biography_infobox_needs_exact_class() {
        let html = r#"<html><body>
<table class="infobox"><tr><th>Genre</th><td>Drama</td></tr></table>
<table class="vcard infobox biography"><tr><th>Spouse</th><td>None</td></tr></table>
<table class="infobox biography vcard"><tr><th>Height</th><td>1.74 m</td></tr></table>
</body></html>"#;
        let summary = scrape_article(html, "url");
        let infobox = summary.infobox_data.as_object().unwrap();

        assert_eq!(infobox["Height"], "1.74 m");
        assert!(!infobox.contains_key("Spouse"));

        let without_biography = html.replace(r#"class="infobox biography vcard""#, r#"class="infobox""#);
        let summary = scrape_article(&without_biography, "url");
        assert_eq!(summary.infobox_data["Genre"], "Drama");
    }

    #[test]
    fn test_content_without_usable_paragraph() {
        let html = r#"<html><body><div id="mw-content-text"><p> </p></div></body></html>"#;
        let summary = scrape_article(html, "url");

        assert_eq!(summary.introduction, INTRODUCTION_NOT_FOUND);
        assert_eq!(summary.full_text, "");
    }

    #[test]
    fn test_generic_infobox_is_used_when_no_biography() {
        let html = r#"<html><body><table class="infobox"><tr><th>Capital</th><td>Paris</td></tr></table></body></html>"#;
        let summary = scrape_article(html, "url");
        assert_eq!(summary.infobox_data["Capital"], "Paris");
    }
}
