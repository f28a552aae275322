use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;

use modusnap_version::VersionSpecifiers;

/// Matches `name[extras] specifiers ; marker` with everything after the
/// name optional.
static REQUIREMENT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?x)^
        (?P<name>[A-Za-z0-9][A-Za-z0-9._-]*)
        \s*(?:\[(?P<extras>[^\]]*)\])?
        \s*(?P<spec>[^;]*?)
        \s*(?:;\s*(?P<marker>.+?))?
        \s*$",
    )
    .unwrap()
});

/// One requirement captured from a pack's requirements file.
#[derive(Debug, Clone)]
pub(crate) struct ParsedRequirement {
    /// Lowercased package name.
    pub(crate) name: String,
    /// The raw specifier text, preserved for reporting.
    pub(crate) raw_spec: String,
    /// `None` when the specifier text exists but is not analyzable
    /// (arbitrary equality, star forms, unrecognized operators).
    pub(crate) specifiers: Option<VersionSpecifiers>,
    pub(crate) marker: Option<String>,
    pub(crate) origin: String,
}

#[derive(Debug)]
pub(crate) enum LineOutcome {
    Requirement(ParsedRequirement),
    /// Blank, comment, or `-r`/`--` directive.
    Skip,
    /// Recorded but not rejected.
    Unparsed,
}

pub(crate) fn parse_line(line: &str, origin: &str) -> LineOutcome {
    let line = line.split('#').next().unwrap_or_default().trim();
    if line.is_empty() {
        return LineOutcome::Skip;
    }
    if line.starts_with("-r") || line.starts_with("--") {
        return LineOutcome::Skip;
    }

    let Some(captures) = REQUIREMENT_RE.captures(line) else {
        return LineOutcome::Unparsed;
    };
    let spec = captures.name("spec").map(|m| m.as_str()).unwrap_or_default();
    // Direct references (`name @ url`) carry no version constraint we can
    // reason about.
    if spec.starts_with('@') {
        return LineOutcome::Unparsed;
    }

    let specifiers = VersionSpecifiers::from_str(spec).ok();
    LineOutcome::Requirement(ParsedRequirement {
        name: captures["name"].to_lowercase(),
        raw_spec: spec.to_string(),
        specifiers,
        marker: captures.name("marker").map(|m| m.as_str().to_string()),
        origin: origin.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::{parse_line, LineOutcome};

    fn requirement(line: &str) -> super::ParsedRequirement {
        match parse_line(line, "pack/requirements.txt") {
            LineOutcome::Requirement(req) => req,
            other => panic!("expected a requirement, got {other:?}"),
        }
    }

    #[test]
    fn plain_name() {
        let req = requirement("Pillow");
        assert_eq!(req.name, "pillow");
        assert!(req.raw_spec.is_empty());
        assert!(req.specifiers.as_ref().unwrap().is_empty());
    }

    #[test]
    fn name_with_specifiers_and_marker() {
        let req = requirement("starlette>=0.40.0,<0.47.0 ; python_version >= '3.9'");
        assert_eq!(req.name, "starlette");
        assert_eq!(req.specifiers.as_ref().unwrap().len(), 2);
        assert_eq!(req.marker.as_deref(), Some("python_version >= '3.9'"));
    }

    #[test]
    fn extras_are_tolerated() {
        let req = requirement("uvicorn[standard]==0.30.0");
        assert_eq!(req.name, "uvicorn");
        assert_eq!(req.specifiers.as_ref().unwrap().len(), 1);
    }

    #[test]
    fn arbitrary_equality_is_kept_but_not_analyzable() {
        let req = requirement("torch===2.4.0+cu121");
        assert_eq!(req.name, "torch");
        assert!(req.specifiers.is_some());
    }

    #[test]
    fn star_specifier_is_not_analyzable() {
        let req = requirement("numpy==1.26.*");
        assert!(req.specifiers.is_none());
        assert_eq!(req.raw_spec, "==1.26.*");
    }

    #[test]
    fn directives_and_comments_are_skipped() {
        assert!(matches!(parse_line("", "f"), LineOutcome::Skip));
        assert!(matches!(parse_line("# a comment", "f"), LineOutcome::Skip));
        assert!(matches!(parse_line("-r base.txt", "f"), LineOutcome::Skip));
        assert!(matches!(parse_line("--index-url https://x", "f"), LineOutcome::Skip));
    }

    #[test]
    fn garbage_is_unparsed() {
        assert!(matches!(parse_line("=== what", "f"), LineOutcome::Unparsed));
        assert!(matches!(
            parse_line("pkg @ https://example.com/pkg.zip", "f"),
            LineOutcome::Unparsed
        ));
    }
}
