use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Matches a PEP 440 version: optional epoch, dotted release, optional
/// pre/post/dev segments and local identifier.
static VERSION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?xi)^\s*v?
        (?:(?P<epoch>\d+)!)?
        (?P<release>\d+(?:\.\d+)*)
        (?:[-_.]?(?P<pre_l>a|alpha|b|beta|rc|c|pre|preview)[-_.]?(?P<pre_n>\d+)?)?
        (?:-(?P<post_n1>\d+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d+)?)?
        (?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d+)?)?
        (?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?
        \s*$",
    )
    .unwrap()
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid version: `{0}`")]
pub struct VersionParseError(pub String);

/// Pre-release tag, normalized (`alpha` → `a`, `c`/`pre`/`preview` → `rc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha,
    Beta,
    Rc,
}

impl PreRelease {
    fn from_letter(letter: &str) -> Self {
        match letter.to_lowercase().as_str() {
            "a" | "alpha" => Self::Alpha,
            "b" | "beta" => Self::Beta,
            _ => Self::Rc,
        }
    }
}

impl Display for PreRelease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpha => f.write_str("a"),
            Self::Beta => f.write_str("b"),
            Self::Rc => f.write_str("rc"),
        }
    }
}

/// A PEP 440 version.
///
/// Ordering and equality follow the PEP: release segments compare with zero
/// padding (`1.0 == 1.0.0`), dev releases sort before pre-releases of the
/// same release, pre-releases before the final, post releases after.
#[derive(Debug, Clone)]
pub struct Version {
    pub epoch: u64,
    pub release: Vec<u64>,
    pub pre: Option<(PreRelease, u64)>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<String>,
}

impl Version {
    /// A release-only version, the common case.
    pub fn from_release(release: Vec<u64>) -> Self {
        Self {
            epoch: 0,
            release,
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    pub fn is_pre_release(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// The exclusive upper boundary implied by a compatible-release
    /// (`~=`) specifier: bump the second-to-last release component and drop
    /// the last (`1.15.3` → `1.16`), or bump the major when the release has a
    /// single component (`2` → `3`).
    pub fn compatible_release_boundary(&self) -> Self {
        let mut release = self.release.clone();
        if release.len() > 1 {
            release.pop();
        }
        if let Some(last) = release.last_mut() {
            *last += 1;
        }
        Self {
            epoch: self.epoch,
            release,
            pre: None,
            post: None,
            dev: None,
            local: None,
        }
    }

    fn release_trimmed(&self) -> &[u64] {
        let mut len = self.release.len();
        while len > 1 && self.release[len - 1] == 0 {
            len -= 1;
        }
        &self.release[..len]
    }

    /// The comparison key from the PEP's ordering rules.
    fn cmp_key(&self) -> (u64, &[u64], (u8, u8, u64), (u8, u64), (u8, u64), Option<&str>) {
        // A bare dev release sorts before any pre-release of the same
        // release; absent pre otherwise sorts after every pre-release.
        let pre = match self.pre {
            Some((letter, n)) => (1, letter as u8, n),
            None if self.post.is_none() && self.dev.is_some() => (0, 0, 0),
            None => (2, 0, 0),
        };
        let post = match self.post {
            Some(n) => (1, n),
            None => (0, 0),
        };
        let dev = match self.dev {
            Some(n) => (0, n),
            None => (1, 0),
        };
        (
            self.epoch,
            self.release_trimmed(),
            pre,
            post,
            dev,
            self.local.as_deref(),
        )
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_key() == other.cmp_key()
    }
}

impl Eq for Version {}

impl Hash for Version {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.cmp_key().hash(state);
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_key().cmp(&other.cmp_key())
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let captures = VERSION_RE
            .captures(s)
            .ok_or_else(|| VersionParseError(s.to_string()))?;

        let epoch = captures
            .name("epoch")
            .map(|m| m.as_str().parse::<u64>())
            .transpose()
            .map_err(|_| VersionParseError(s.to_string()))?
            .unwrap_or(0);
        let release = captures["release"]
            .split('.')
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError(s.to_string()))?;
        let pre = captures.name("pre_l").map(|letter| {
            let n = captures
                .name("pre_n")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0);
            (PreRelease::from_letter(letter.as_str()), n)
        });
        let post = if let Some(n) = captures.name("post_n1") {
            Some(n.as_str().parse().map_err(|_| VersionParseError(s.to_string()))?)
        } else if captures.name("post_l").is_some() {
            Some(
                captures
                    .name("post_n2")
                    .and_then(|m| m.as_str().parse().ok())
                    .unwrap_or(0),
            )
        } else {
            None
        };
        let dev = captures.name("dev_l").map(|_| {
            captures
                .name("dev_n")
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        });
        let local = captures
            .name("local")
            .map(|m| m.as_str().to_lowercase().replace(['-', '_'], "."));

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release = self
            .release
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&release)?;
        if let Some((letter, n)) = self.pre {
            write!(f, "{letter}{n}")?;
        }
        if let Some(post) = self.post {
            write!(f, ".post{post}")?;
        }
        if let Some(dev) = self.dev {
            write!(f, ".dev{dev}")?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_str(&s).map_err(D::Error::custom)
    }
}
