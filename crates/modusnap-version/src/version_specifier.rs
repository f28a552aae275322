use std::fmt::{Display, Formatter};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

use crate::version::{Version, VersionParseError};

/// Matches one specifier clause, operator first, version after.
static SPECIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(?P<operator>~=|===|==|!=|<=|>=|<|>)\s*(?P<version>.+?)\s*$").unwrap());

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VersionSpecifierParseError {
    #[error("missing or unrecognized operator in `{0}`")]
    MissingOperator(String),
    #[error(transparent)]
    Version(#[from] VersionParseError),
}

/// A specifier operator, normalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `~=`, compatible release.
    TildeEqual,
    /// `==`
    Equal,
    /// `!=`
    NotEqual,
    /// `<=`
    LessThanEqual,
    /// `>=`
    GreaterThanEqual,
    /// `<`
    LessThan,
    /// `>`
    GreaterThan,
    /// `===`, arbitrary equality. Not analyzable for intersection.
    ExactEqual,
}

impl Operator {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TildeEqual => "~=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::LessThanEqual => "<=",
            Self::GreaterThanEqual => ">=",
            Self::LessThan => "<",
            Self::GreaterThan => ">",
            Self::ExactEqual => "===",
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One clause of a requirement specifier, such as `>=1.16` or `~=1.15.3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionSpecifier {
    operator: Operator,
    version: Version,
}

impl VersionSpecifier {
    pub fn new(operator: Operator, version: Version) -> Self {
        Self { operator, version }
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Whether the given version satisfies this clause.
    pub fn contains(&self, version: &Version) -> bool {
        match self.operator {
            Operator::Equal => version == &self.version,
            Operator::NotEqual => version != &self.version,
            Operator::LessThanEqual => version <= &self.version,
            Operator::GreaterThanEqual => version >= &self.version,
            Operator::LessThan => version < &self.version,
            Operator::GreaterThan => version > &self.version,
            Operator::TildeEqual => {
                version >= &self.version
                    && version < &self.version.compatible_release_boundary()
            }
            // Arbitrary equality compares the canonical renderings.
            Operator::ExactEqual => version.to_string() == self.version.to_string(),
        }
    }
}

impl FromStr for VersionSpecifier {
    type Err = VersionSpecifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = SPECIFIER_RE
            .captures(s)
            .ok_or_else(|| VersionSpecifierParseError::MissingOperator(s.to_string()))?;
        let operator = match &captures["operator"] {
            "~=" => Operator::TildeEqual,
            "==" => Operator::Equal,
            "!=" => Operator::NotEqual,
            "<=" => Operator::LessThanEqual,
            ">=" => Operator::GreaterThanEqual,
            "<" => Operator::LessThan,
            ">" => Operator::GreaterThan,
            "===" => Operator::ExactEqual,
            _ => unreachable!("operator alternation is closed"),
        };
        let version = Version::from_str(&captures["version"])?;
        Ok(Self { operator, version })
    }
}

impl Display for VersionSpecifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.operator, self.version)
    }
}

impl Serialize for VersionSpecifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionSpecifier {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(D::Error::custom)
    }
}

/// A comma-separated conjunction of specifier clauses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct VersionSpecifiers(Vec<VersionSpecifier>);

impl VersionSpecifiers {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, VersionSpecifier> {
        self.0.iter()
    }

    /// Whether all clauses admit the given version.
    pub fn contains(&self, version: &Version) -> bool {
        self.0.iter().all(|specifier| specifier.contains(version))
    }
}

impl FromIterator<VersionSpecifier> for VersionSpecifiers {
    fn from_iter<T: IntoIterator<Item = VersionSpecifier>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for VersionSpecifiers {
    type Item = VersionSpecifier;
    type IntoIter = std::vec::IntoIter<VersionSpecifier>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromStr for VersionSpecifiers {
    type Err = VersionSpecifierParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Ok(Self(Vec::new()));
        }
        trimmed
            .split(',')
            .map(VersionSpecifier::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }
}

impl Display for VersionSpecifiers {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (idx, specifier) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{specifier}")?;
        }
        Ok(())
    }
}
