use modusnap_version::{Operator, Version, VersionSpecifiers};

/// One half-open or closed bound.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// The folded state of all specifiers seen for one package.
#[derive(Debug, Default)]
pub(crate) struct Intersection {
    lower: Option<Bound>,
    upper: Option<Bound>,
    exact: Option<Version>,
    excluded: Vec<Version>,
    /// Raw specifier strings we refuse to reason about.
    not_analyzable: Vec<String>,
    /// Conflict reasons accumulated while folding.
    reasons: Vec<String>,
}

impl Intersection {
    /// Fold one clause set into the running intersection. `raw` is the
    /// original text, used verbatim in reasons.
    pub(crate) fn add(&mut self, specifiers: Option<&VersionSpecifiers>, raw: &str) {
        let Some(specifiers) = specifiers else {
            if !raw.is_empty() {
                self.not_analyzable.push(raw.to_string());
            }
            return;
        };
        for specifier in specifiers.iter() {
            let version = specifier.version().clone();
            match specifier.operator() {
                Operator::Equal => self.add_exact(version),
                Operator::NotEqual => self.excluded.push(version),
                Operator::GreaterThan => self.add_lower(version, false),
                Operator::GreaterThanEqual => self.add_lower(version, true),
                Operator::LessThan => self.add_upper(version, false),
                Operator::LessThanEqual => self.add_upper(version, true),
                Operator::TildeEqual => {
                    let boundary = version.compatible_release_boundary();
                    self.add_lower(version, true);
                    self.add_upper(boundary, false);
                }
                Operator::ExactEqual => self.not_analyzable.push(specifier.to_string()),
            }
        }
    }

    fn add_exact(&mut self, version: Version) {
        match &self.exact {
            Some(existing) if *existing != version => self.reasons.push(format!(
                "multiple distinct exact pins: =={existing} and =={version}"
            )),
            _ => self.exact = Some(version),
        }
    }

    fn add_lower(&mut self, version: Version, inclusive: bool) {
        match &mut self.lower {
            Some(bound) if version > bound.version => {
                *bound = Bound { version, inclusive };
            }
            // At equal versions the exclusive bound is the stricter one.
            Some(bound) if version == bound.version => {
                bound.inclusive = bound.inclusive && inclusive;
            }
            Some(_) => {}
            None => self.lower = Some(Bound { version, inclusive }),
        }
    }

    fn add_upper(&mut self, version: Version, inclusive: bool) {
        match &mut self.upper {
            Some(bound) if version < bound.version => {
                *bound = Bound { version, inclusive };
            }
            Some(bound) if version == bound.version => {
                bound.inclusive = bound.inclusive && inclusive;
            }
            Some(_) => {}
            None => self.upper = Some(Bound { version, inclusive }),
        }
    }

    /// Resolve the fold: a normalized specifier string on success, the
    /// reason list on conflict.
    pub(crate) fn resolve(mut self) -> Result<String, Vec<String>> {
        for raw in &self.not_analyzable {
            self.reasons
                .push(format!("specifier `{raw}` is not fully analyzable"));
        }

        if let (Some(lower), Some(upper)) = (&self.lower, &self.upper) {
            if lower.version > upper.version {
                self.reasons.push(format!(
                    "lower bound {} is greater than upper bound {}",
                    lower.version, upper.version
                ));
            } else if lower.version == upper.version && !(lower.inclusive && upper.inclusive) {
                self.reasons.push(format!(
                    "bounds meet at {} but at least one side is exclusive",
                    lower.version
                ));
            }
        }

        if let Some(exact) = &self.exact {
            if self.excluded.iter().any(|excluded| excluded == exact) {
                self.reasons
                    .push(format!("exact pin =={exact} is excluded by !={exact}"));
            }
            if !self.admits(exact) {
                self.reasons
                    .push(format!("exact pin =={exact} lies outside the combined bounds"));
            }
        }

        if !self.reasons.is_empty() {
            return Err(self.reasons);
        }

        if let Some(exact) = self.exact {
            return Ok(format!("=={exact}"));
        }

        let mut parts = Vec::new();
        if let Some(lower) = &self.lower {
            let op = if lower.inclusive { ">=" } else { ">" };
            parts.push(format!("{op}{}", lower.version));
        }
        if let Some(upper) = &self.upper {
            let op = if upper.inclusive { "<=" } else { "<" };
            parts.push(format!("{op}{}", upper.version));
        }
        let mut excluded: Vec<&Version> = self
            .excluded
            .iter()
            .filter(|version| in_bounds(version, self.lower.as_ref(), self.upper.as_ref()))
            .collect();
        excluded.sort();
        excluded.dedup();
        for version in excluded {
            parts.push(format!("!={version}"));
        }
        Ok(parts.join(","))
    }

    /// Whether the folded bounds and exclusions admit `version`. The exact
    /// pin is checked separately.
    fn admits(&self, version: &Version) -> bool {
        in_bounds(version, self.lower.as_ref(), self.upper.as_ref())
            && !self.excluded.iter().any(|excluded| excluded == version)
    }
}

fn in_bounds(version: &Version, lower: Option<&Bound>, upper: Option<&Bound>) -> bool {
    if let Some(lower) = lower {
        let above = if lower.inclusive {
            version >= &lower.version
        } else {
            version > &lower.version
        };
        if !above {
            return false;
        }
    }
    if let Some(upper) = upper {
        let below = if upper.inclusive {
            version <= &upper.version
        } else {
            version < &upper.version
        };
        if !below {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use test_case::test_case;

    use modusnap_version::{Version, VersionSpecifiers};

    use super::Intersection;

    fn resolve(specs: &[&str]) -> Result<String, Vec<String>> {
        let mut intersection = Intersection::default();
        for spec in specs {
            match VersionSpecifiers::from_str(spec) {
                Ok(parsed) => intersection.add(Some(&parsed), spec),
                Err(_) => intersection.add(None, spec),
            }
        }
        intersection.resolve()
    }

    #[test_case(&[">=1.2", "<2.0"], ">=1.2,<2.0"; "simple band")]
    #[test_case(&[">=1.2", ">=1.5", "<2.0"], ">=1.5,<2.0"; "largest lower wins")]
    #[test_case(&["<2.0", "<=1.8"], "<=1.8"; "smallest upper wins")]
    #[test_case(&[">1.5", ">=1.5"], ">1.5"; "exclusive dominates at equal versions")]
    #[test_case(&["~=1.15.3"], ">=1.15.3,<1.16"; "compatible release expands")]
    #[test_case(&["==2.0.69", ">=2.0"], "==2.0.69"; "exact inside bounds")]
    #[test_case(&[">=1.0", "!=1.5", "<2.0"], ">=1.0,<2.0,!=1.5"; "exclusion inside band is kept")]
    #[test_case(&[">=1.0", "!=5.0"], ">=1.0,!=5.0"; "unbounded above keeps exclusion")]
    #[test_case(&["!=1.5", "<1.4"], "<1.4"; "exclusion outside band is dropped")]
    #[test_case(&[""], ""; "no constraints")]
    fn compatible(specs: &[&str], expected: &str) {
        assert_eq!(resolve(specs).unwrap(), expected);
    }

    #[test]
    fn bound_inversion_conflicts_with_reason() {
        let reasons = resolve(&[">=0.49.1", "<0.47.0,>=0.40.0"]).unwrap_err();
        assert!(
            reasons
                .iter()
                .any(|r| r.contains("lower bound 0.49.1 is greater than upper bound 0.47.0")),
            "reasons: {reasons:?}"
        );
    }

    #[test]
    fn touching_exclusive_bounds_conflict() {
        let reasons = resolve(&[">1.0", "<=1.0"]).unwrap_err();
        assert!(reasons[0].contains("exclusive"));
    }

    #[test]
    fn equal_inclusive_bounds_are_fine() {
        assert_eq!(resolve(&[">=1.0", "<=1.0"]).unwrap(), ">=1.0,<=1.0");
    }

    #[test]
    fn distinct_exact_pins_conflict() {
        let reasons = resolve(&["==1.0", "==2.0"]).unwrap_err();
        assert!(reasons[0].contains("multiple distinct exact pins"));
    }

    #[test]
    fn repeated_exact_pin_is_not_a_conflict() {
        assert_eq!(resolve(&["==1.0", "==1.0.0"]).unwrap(), "==1.0");
    }

    #[test]
    fn excluded_exact_pin_conflicts() {
        let reasons = resolve(&["==1.5", "!=1.5"]).unwrap_err();
        assert!(reasons[0].contains("excluded"));
    }

    #[test]
    fn exact_outside_bounds_conflicts() {
        let reasons = resolve(&["==1.0", ">=2.0"]).unwrap_err();
        assert!(reasons[0].contains("outside the combined bounds"));
    }

    #[test]
    fn arbitrary_equality_conflicts_as_not_analyzable() {
        let reasons = resolve(&["===1.0"]).unwrap_err();
        assert!(reasons[0].contains("not fully analyzable"));
    }

    #[test]
    fn star_form_conflicts_as_not_analyzable() {
        let reasons = resolve(&["==1.26.*"]).unwrap_err();
        assert!(reasons[0].contains("not fully analyzable"));
    }

    /// The normalized output admits exactly the intersection of the inputs.
    #[test]
    fn normalized_output_preserves_membership() {
        let inputs = [">=1.2,<2.0", "!=1.5", ">1.0"];
        let normalized = resolve(&inputs).unwrap();
        let normalized = VersionSpecifiers::from_str(&normalized).unwrap();
        let originals: Vec<VersionSpecifiers> = inputs
            .iter()
            .map(|spec| VersionSpecifiers::from_str(spec).unwrap())
            .collect();

        for probe in ["1.0", "1.2", "1.4.9", "1.5", "1.5.1", "1.9999", "2.0", "3.1"] {
            let version = Version::from_str(probe).unwrap();
            let expected = originals.iter().all(|spec| spec.contains(&version));
            assert_eq!(
                normalized.contains(&version),
                expected,
                "membership diverged at {probe}"
            );
        }
    }
}
