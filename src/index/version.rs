use std::str::FromStr;

use pep440_rs::Version;

/// Parses a version directory name, logging the ones that do not
/// follow the public version scheme.
pub fn parse(raw: &str) -> Option<Version> {
    match Version::from_str(raw) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Skipping unparseable version '{}': {}", raw, e);
            None
        }
    }
}

/// Orders version names descending by version precedence. Names that
/// fail to parse are excluded from the result.
#[must_use]
pub fn sort_descending(names: Vec<String>) -> Vec<String> {
    let mut parsed: Vec<(Version, String)> = names
        .into_iter()
        .filter_map(|name| parse(&name).map(|v| (v, name)))
        .collect();
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed.into_iter().map(|(_, name)| name).collect()
}

/// Selects the version a bare request resolves to: the maximum final
/// release, falling back to the maximum pre-release when no final
/// release exists.
#[must_use]
pub fn select_latest(names: &[String]) -> Option<String> {
    let parsed: Vec<(Version, &String)> = names
        .iter()
        .filter_map(|name| parse(name).map(|v| (v, name)))
        .collect();

    let latest_final = parsed
        .iter()
        .filter(|(v, _)| !v.any_prerelease())
        .max_by(|a, b| a.0.cmp(&b.0));

    latest_final
        .or_else(|| parsed.iter().max_by(|a, b| a.0.cmp(&b.0)))
        .map(|(_, name)| (*name).clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_sort_descending() {
        let sorted = sort_descending(names(&["1.0", "2.0a1", "1.0.1"]));
        assert_eq!(sorted, names(&["2.0a1", "1.0.1", "1.0"]));
    }

    #[test]
    fn test_sort_drops_unparseable() {
        let sorted = sort_descending(names(&["1.0", "not-a-version", "0.9"]));
        assert_eq!(sorted, names(&["1.0", "0.9"]));
    }

    #[test]
    fn test_latest_skips_prereleases() {
        let latest = select_latest(&names(&["1.0", "1.0.1", "2.0a1"]));
        assert_eq!(latest.as_deref(), Some("1.0.1"));
    }

    #[test]
    fn test_latest_falls_back_to_prerelease() {
        let latest = select_latest(&names(&["2.0a1", "2.0b2"]));
        assert_eq!(latest.as_deref(), Some("2.0b2"));
    }

    #[test]
    fn test_ordering_table() {
        // Known orderings under the public version scheme.
        let cases = [
            ("1.0.1", "1.0"),
            ("1.0", "1.0rc1"),
            ("1.0rc1", "1.0b2"),
            ("1.0b2", "1.0a1"),
            ("1.0.post1", "1.0"),
            ("1.0", "1.0.dev1"),
            ("2.0a1", "1.0.1"),
            ("1.10", "1.9"),
        ];
        for (greater, lesser) in cases {
            let g = parse(greater).unwrap();
            let l = parse(lesser).unwrap();
            assert!(g > l, "{greater} should sort above {lesser}");
        }
    }

    #[test]
    fn test_latest_of_empty_is_none() {
        assert_eq!(select_latest(&[]), None);
        assert_eq!(select_latest(&names(&["garbage"])), None);
    }
}
