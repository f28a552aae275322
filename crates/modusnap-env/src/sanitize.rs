use once_cell::sync::Lazy;
use regex::Regex;

/// Characters a specifier may contain at all.
static ALLOWED_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-<>=!~\[\],:@+/ ]+$").unwrap());

/// The overall shape: a package name, optional extras, optional version
/// constraints. No embedded whitespace.
static REQUIREMENT_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*(?:\[[^\]]*\])?(?:[<>=!~][A-Za-z0-9_.\-<>=!~,*+]*)?$")
        .unwrap()
});

/// Filter caller-supplied package specifiers down to the safe, plausible
/// ones: charset check, shape check, dedup, order preserved.
pub fn sanitize_packages(raw: &[String]) -> Vec<String> {
    let mut seen = Vec::new();
    for candidate in raw {
        let candidate = candidate.trim();
        if candidate.is_empty()
            || !ALLOWED_CHARS.is_match(candidate)
            || !REQUIREMENT_SHAPE.is_match(candidate)
        {
            continue;
        }
        if !seen.iter().any(|existing: &String| existing == candidate) {
            seen.push(candidate.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::sanitize_packages;

    fn owned(specs: &[&str]) -> Vec<String> {
        specs.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn keeps_good_specifiers_in_order() {
        let out = sanitize_packages(&owned(&["torch==2.4", "rm -rf /", "pillow"]));
        assert_eq!(out, vec!["torch==2.4".to_string(), "pillow".to_string()]);
    }

    #[test]
    fn drops_shell_metacharacters() {
        let out = sanitize_packages(&owned(&["pkg; rm -rf", "pkg$(x)", "pkg`x`", "pkg|y"]));
        assert!(out.is_empty());
    }

    #[test]
    fn deduplicates_preserving_first() {
        let out = sanitize_packages(&owned(&["pillow", "torch", "pillow"]));
        assert_eq!(out, vec!["pillow".to_string(), "torch".to_string()]);
    }

    #[test]
    fn accepts_extras_and_compound_constraints() {
        let out = sanitize_packages(&owned(&[
            "uvicorn[standard]>=0.30,<0.31",
            "scipy~=1.15.3",
            "click<8.2,>=8.0.0",
        ]));
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn rejects_leading_dashes() {
        assert!(sanitize_packages(&owned(&["--index-url=evil", "-e ."])).is_empty());
    }
}
