//! Canonical URL form used for deduplication and storage keys.

use url::form_urlencoded;
use url::Url;

/// Normalize a URL: lowercase scheme and host, drop the fragment, stable-sort
/// query parameters by key and re-encode. The path is left untouched.
///
/// Idempotent: `normalize_url(&normalize_url(u)) == normalize_url(u)`.
pub fn normalize_url(url: &Url) -> Url {
    let mut normalized = url.clone();

    // The url crate already lowercases scheme and host on parse, but a URL
    // assembled through setters can carry mixed case.
    if let Some(host) = normalized.host_str() {
        let lower = host.to_ascii_lowercase();
        if lower != host {
            let _ = normalized.set_host(Some(&lower));
        }
    }

    normalized.set_fragment(None);

    let mut pairs: Vec<(String, String)> = normalized
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if pairs.is_empty() {
        normalized.set_query(None);
    } else {
        // Stable sort keeps repeated keys in their original relative order.
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish();
        normalized.set_query(Some(&query));
    }

    normalized
}

/// The deduplication key for a URL: its normalized string form.
pub fn normalized_key(url: &Url) -> String {
    normalize_url(url).into()
}
