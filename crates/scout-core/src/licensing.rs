//! ============================================================================
//! Licensed URLs - Provenance marker and license query parameters
//! ============================================================================
//! The backend decides which view a publisher serves by looking at two query
//! parameters on the target URL: `via=fairfetch` and `license=<LICENSE>`.
//! ============================================================================

use url::form_urlencoded;
use url::Url;

use crate::types::License;

/// Provenance marker parameter
pub const MARKER_PARAM: &str = "via";
/// Provenance marker value
pub const MARKER_VALUE: &str = "fairfetch";
/// License parameter
pub const LICENSE_PARAM: &str = "license";

/// Append (or replace) the marker and license parameters on `url`.
///
/// Upsert semantics: applying this to its own output changes nothing. When
/// `url` does not parse as an absolute URL the query string is spliced by
/// hand, so this never fails.
pub fn build_licensed_url(url: &str, license: License, use_marker: bool) -> String {
    if !use_marker {
        return url.to_string();
    }

    match Url::parse(url) {
        Ok(mut parsed) => {
            let kept: Vec<(String, String)> = parsed
                .query_pairs()
                .filter(|(key, _)| !is_managed(key))
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();

            parsed
                .query_pairs_mut()
                .clear()
                .extend_pairs(kept)
                .append_pair(MARKER_PARAM, MARKER_VALUE)
                .append_pair(LICENSE_PARAM, license.as_str());
            parsed.to_string()
        }
        Err(_) => splice_query(url, license),
    }
}

fn is_managed(key: &str) -> bool {
    key == MARKER_PARAM || key == LICENSE_PARAM
}

fn splice_query(url: &str, license: License) -> String {
    let (base, query) = url.split_once('?').unwrap_or((url, ""));

    let mut serializer = form_urlencoded::Serializer::new(String::new());
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if !is_managed(&key) {
            serializer.append_pair(&key, &value);
        }
    }
    serializer.append_pair(MARKER_PARAM, MARKER_VALUE);
    serializer.append_pair(LICENSE_PARAM, license.as_str());

    format!("{}?{}", base, serializer.finish())
}

/// Whether `url` carries the provenance marker
pub fn has_marker(url: &str) -> bool {
    match Url::parse(url) {
        Ok(parsed) => parsed
            .query_pairs()
            .any(|(key, value)| key == MARKER_PARAM && value == MARKER_VALUE),
        Err(_) => url.contains("via=fairfetch"),
    }
}

/// Label describing which publisher view a request URL will get
pub fn view_label(request_url: &str) -> &'static str {
    if has_marker(request_url) {
        "Licensed AI view"
    } else {
        "Human paywall preview"
    }
}

/// Mask an API key for display
pub fn mask_api_key(value: &str) -> String {
    if value.is_empty() {
        return "Not set".to_string();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() < 8 {
        return "••••".to_string();
    }
    let head: String = chars[..3].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}••••{}", head, tail)
}
