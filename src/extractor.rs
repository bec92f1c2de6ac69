//! Pure extraction of book attributes and related-book URLs from parsed
//! HTML. No I/O happens here; site-schema churn is absorbed in the
//! selectors below.

use crate::book::BookAttributes;
use crate::urls;
use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// The corpus is expected to carry the "readers also enjoyed" link;
    /// its absence usually means a blocked or empty response.
    #[error("book has no related books: {url}")]
    MissingRelatedLink { url: String },
}

/// Trim whitespace and replace non-breaking spaces with ASCII space.
pub fn clean_text(text: &str) -> String {
    text.replace('\u{a0}', " ").trim().to_string()
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).unwrap();
    doc.select(&selector)
        .next()
        .map(|el| clean_text(&el.text().collect::<String>()))
}

fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let selector = Selector::parse(selector).unwrap();
    doc.select(&selector)
        .next()
        .and_then(|el| el.value().attr(attr))
        .map(str::to_string)
}

/// Parse an integer, tolerating thousands separators. Unparseable input
/// yields the unknown sentinel -1.
fn parse_int(text: &str) -> i32 {
    clean_text(text).replace(',', "").parse().unwrap_or(-1)
}

/// Parse the leading integer of strings like "352 pages".
fn parse_leading_int(text: &str) -> i32 {
    let cleaned = clean_text(text);
    let digits: String = cleaned.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().unwrap_or(-1)
}

/// Parse a decimal rating into scaled integer hundredths (4.23 -> 423).
fn parse_rating(text: &str) -> i32 {
    match clean_text(text).parse::<f64>() {
        Ok(value) => (value * 100.0).round() as i32,
        Err(_) => -1,
    }
}

/// Extract the attributes of the book shown on a book page.
pub fn extract_book(doc: &Html, page_url: &str) -> BookAttributes {
    let title = select_text(doc, "h1#bookTitle").unwrap_or_default();
    let author = select_text(doc, "a.authorName span").unwrap_or_default();
    let author_url = select_attr(doc, "a.authorName", "href")
        .and_then(|href| urls::absolute(page_url, &href).ok())
        .unwrap_or_default();

    let rating = select_text(doc, r#"span[itemprop="ratingValue"]"#)
        .map(|text| parse_rating(&text))
        .unwrap_or(-1);
    let ratings_total = select_attr(doc, r#"a meta[itemprop="ratingCount"]"#, "content")
        .map(|text| parse_int(&text))
        .unwrap_or(-1);
    let reviews = select_attr(doc, r#"a meta[itemprop="reviewCount"]"#, "content")
        .map(|text| parse_int(&text))
        .unwrap_or(-1);

    // The distribution table is rendered client side on the live site, so
    // these usually come back as the unknown sentinel.
    let mut ratings_by_star = [-1i32; 5];
    for star in 1..=5usize {
        let selector = format!(
            "table#rating_distribution > tbody > tr:nth-child({}) > th",
            6 - star
        );
        ratings_by_star[star - 1] = select_text(doc, &selector)
            .map(|text| parse_int(&text))
            .unwrap_or(-1);
    }

    let pages = select_text(doc, r#"span[itemprop="numberOfPages"]"#)
        .map(|text| parse_leading_int(&text))
        .unwrap_or(-1);

    let genre_selector = Selector::parse("a.actionLinkLite.bookPageGenreLink").unwrap();
    let mut genres: Vec<String> = Vec::new();
    for el in doc.select(&genre_selector) {
        let genre = clean_text(&el.text().collect::<String>());
        if !genre.is_empty() && !genres.contains(&genre) {
            genres.push(genre);
        }
    }

    BookAttributes {
        title,
        author,
        author_url,
        rating,
        ratings_total,
        ratings_by_star,
        reviews,
        pages,
        genres,
    }
}

/// Extract the absolute URL of the "readers also enjoyed" page, if the book
/// page links to one.
pub fn extract_also_read_link(doc: &Html, page_url: &str) -> Option<String> {
    let href = select_attr(doc, "a.actionLink.seeMoreLink", "href")?;
    urls::absolute(page_url, &href).ok()
}

/// Extract the ordered related-book URLs from a "readers also enjoyed"
/// page. URLs that fail to resolve or do not point at a book page are
/// skipped without consuming a position, so the result is dense.
pub fn extract_related_urls(doc: &Html, base_url: &str) -> Vec<String> {
    let marker_selector =
        Selector::parse("div.responsiveMainContentContainer div.membersAlsoLikedText").unwrap();
    let link_selector = Selector::parse(r#"a[itemprop="url"]"#).unwrap();

    let Some(marker) = doc.select(&marker_selector).next() else {
        return Vec::new();
    };

    let mut related = Vec::new();
    for sibling in marker.next_siblings() {
        let Some(element) = ElementRef::wrap(sibling) else {
            continue;
        };
        for anchor in element.select(&link_selector) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let absolute = match urls::absolute(base_url, href) {
                Ok(url) => url,
                Err(_) => {
                    tracing::warn!(link = href, "found bad url, skipping it");
                    continue;
                }
            };
            if !urls::is_book_url(&absolute) {
                continue;
            }
            related.push(absolute);
        }
    }
    related
}
