//! Value normalization and the capacity tolerance test shared by all phases.

/// Suffixes dropped from the end of a city name.
const CITY_SUFFIXES: &[&str] = &["city", "town", "township", "twp", "village", "borough", "boro", "cdp"];

/// Prefixes dropped from the start of a city name.
const CITY_PREFIXES: &[&str] = &["city of", "town of", "township of", "village of", "borough of"];

/// Canonical city key: lowercase, punctuation stripped, common affixes removed.
///
/// Returns `None` when nothing meaningful is left.
pub fn normalize_city(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    let mut words: Vec<&str> = cleaned.split_whitespace().collect();

    for prefix in CITY_PREFIXES {
        let prefix_words: Vec<&str> = prefix.split(' ').collect();
        if words.len() > prefix_words.len() && words[..prefix_words.len()] == prefix_words[..] {
            words.drain(..prefix_words.len());
            break;
        }
    }
    if words.len() > 1 {
        if let Some(last) = words.last() {
            if CITY_SUFFIXES.contains(last) {
                words.pop();
            }
        }
    }

    let words: Vec<&str> = words
        .into_iter()
        .map(|word| match word {
            "saint" => "st",
            "sainte" => "ste",
            "fort" => "ft",
            "mount" => "mt",
            other => other,
        })
        .collect();

    let key = words.join(" ");
    (!key.is_empty()).then_some(key)
}

/// Two-letter state code or name, uppercased and trimmed.
pub fn normalize_state(raw: &str) -> Option<String> {
    let state = raw.trim().to_ascii_uppercase();
    (!state.is_empty()).then_some(state)
}

/// `min/max` of two capacities, or `None` when either is missing or not positive.
pub fn capacity_ratio(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    let usable = |mw: Option<f64>| mw.filter(|v| v.is_finite() && *v > 0.0);
    let (a, b) = (usable(a)?, usable(b)?);
    Some(a.min(b) / a.max(b))
}

/// Capacities agree within `tolerance`: the smaller is at least `(1 - tolerance)` of the larger.
///
/// Missing or zero capacity never matches.
pub fn capacity_matches(a: Option<f64>, b: Option<f64>, tolerance: f64) -> bool {
    const EPSILON: f64 = 1e-9;
    capacity_ratio(a, b)
        .map(|ratio| ratio + EPSILON >= 1.0 - tolerance)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_city() {
        assert_eq!(normalize_city("St. Louis").as_deref(), Some("st louis"));
        assert_eq!(normalize_city("Saint Louis").as_deref(), Some("st louis"));
        assert_eq!(normalize_city("Carson City").as_deref(), Some("carson"));
        assert_eq!(normalize_city("City of Fresno").as_deref(), Some("fresno"));
        assert_eq!(normalize_city("Bedford Twp.").as_deref(), Some("bedford"));
        assert_eq!(normalize_city("  WINSTON-SALEM ").as_deref(), Some("winston salem"));
        assert_eq!(normalize_city("City").as_deref(), Some("city"));
        assert_eq!(normalize_city(" ,. "), None);
    }

    #[test]
    fn test_tolerance_boundary() {
        assert!(capacity_matches(Some(10.0), Some(6.0), 0.5));
        assert!(capacity_matches(Some(6.0), Some(10.0), 0.5));
        assert!(!capacity_matches(Some(10.0), Some(4.0), 0.5));
        assert!(capacity_matches(Some(10.0), Some(5.0), 0.5));
        assert!(capacity_matches(Some(8.0), Some(10.0), 0.25));
        assert!(!capacity_matches(Some(7.0), Some(10.0), 0.25));
    }

    #[test]
    fn test_missing_capacity_never_matches() {
        assert!(!capacity_matches(None, Some(5.0), 0.5));
        assert!(!capacity_matches(Some(0.0), Some(0.0), 0.99));
        assert!(!capacity_matches(Some(-1.0), Some(1.0), 0.5));
        assert_eq!(capacity_ratio(Some(2.0), None), None);
    }
}
