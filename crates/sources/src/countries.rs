//! Country code to URL slug tables for each list provider.

use mediatrend_core::platform::WORLD;

/// Tudum path segment for a country. `None` selects the global list.
///
/// Codes missing from the table are tried lowercased.
pub fn netflix_slug(country: &str) -> Option<String> {
    let code = country.trim().to_ascii_uppercase();
    if code == WORLD || code.is_empty() {
        return None;
    }
    let slug = match code.as_str() {
        "CH" => "switzerland",
        "DE" => "germany",
        "AT" => "austria",
        "FR" => "france",
        "IT" => "italy",
        "ES" => "spain",
        "US" => "united-states",
        "GB" | "UK" => "united-kingdom",
        "CA" => "canada",
        "NL" => "netherlands",
        "BE" => "belgium",
        "DK" => "denmark",
        "SE" => "sweden",
        "NO" => "norway",
        "FI" => "finland",
        "PL" => "poland",
        "PT" => "portugal",
        "IE" => "ireland",
        "AU" => "australia",
        "NZ" => "new-zealand",
        _ => return Some(code.to_ascii_lowercase()),
    };
    Some(slug.to_string())
}

/// FlixPatrol path segment, or `None` when FlixPatrol has no list for the country.
pub fn flixpatrol_slug(country: &str) -> Option<&'static str> {
    let slug = match country.trim().to_ascii_uppercase().as_str() {
        WORLD => "world",
        "DE" => "germany",
        "CH" => "switzerland",
        "AT" => "austria",
        "US" => "united-states",
        "GB" | "UK" => "united-kingdom",
        "FR" => "france",
        "IT" => "italy",
        "ES" => "spain",
        "CA" => "canada",
        "AU" => "australia",
        "NL" => "netherlands",
        "BE" => "belgium",
        "PL" => "poland",
        "SE" => "sweden",
        "NO" => "norway",
        "DK" => "denmark",
        _ => return None,
    };
    Some(slug)
}
