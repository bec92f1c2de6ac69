//! URL helper functions used throughout the crawler.

use url::Url;

/// Path marker every crawlable book page URL must contain.
const BOOK_PATH_MARKER: &str = "/book/show/";

/// Resolve a possibly-relative link against the provided base URL.
pub fn absolute(base_url: &str, link: &str) -> Result<String, url::ParseError> {
    let base = Url::parse(base_url)?;
    Ok(base.join(link)?.to_string())
}

/// Whether a URL points at a book page the crawler should follow.
pub fn is_book_url(url: &str) -> bool {
    url.contains(BOOK_PATH_MARKER)
}

/// Normalize CLI input by adding https:// when no scheme is provided.
pub fn normalize_seed(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        return trimmed.to_string();
    }
    format!("https://{}", trimmed)
}
