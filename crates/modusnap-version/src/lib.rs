//! Python version and version-specifier handling, sufficient for requirement
//! reconciliation: parsing, ordering, containment, and the compatible-release
//! boundary bump.
//!
//! ```rust
//! # use std::str::FromStr;
//! use modusnap_version::{Version, VersionSpecifiers};
//!
//! let specifiers = VersionSpecifiers::from_str(">=1.16,<2.0").unwrap();
//! assert!(specifiers.contains(&Version::from_str("1.19").unwrap()));
//! assert!(!specifiers.contains(&Version::from_str("2.0").unwrap()));
//! ```

pub use crate::version::{PreRelease, Version, VersionParseError};
pub use crate::version_specifier::{
    Operator, VersionSpecifier, VersionSpecifierParseError, VersionSpecifiers,
};

mod version;
mod version_specifier;
