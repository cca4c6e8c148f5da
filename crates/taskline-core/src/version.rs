use crate::error::TasklineError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Agent version negotiated for the model, e.g. `2.7.0`.
///
/// Only the numeric `major.minor.patch` triple is compared; a trailing
/// `.build` component is accepted and ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// First agent version that understands sequential action ids.
pub const MIN_VERSION_SUPPORT_NEW_ACTION_ID: Version = Version::new(2, 6, 999);

/// Whether agents at `version` understand sequential action ids.
pub fn is_new_action_id_supported(version: Version) -> bool {
    version >= MIN_VERSION_SUPPORT_NEW_ACTION_ID
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl std::str::FromStr for Version {
    type Err = TasklineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TasklineError::InvalidVersion(s.to_string());
        let parts: Vec<&str> = s.split('.').collect();
        if !(3..=4).contains(&parts.len()) {
            return Err(invalid());
        }
        let num = |p: &str| p.parse::<u32>().map_err(|_| invalid());
        Ok(Version::new(num(parts[0])?, num(parts[1])?, num(parts[2])?))
    }
}

impl TryFrom<String> for Version {
    type Error = TasklineError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> String {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_triples_and_builds() {
        assert_eq!("2.6.999".parse::<Version>().unwrap(), Version::new(2, 6, 999));
        assert_eq!("2.7.0.1".parse::<Version>().unwrap(), Version::new(2, 7, 0));
        assert!("2.7".parse::<Version>().is_err());
        assert!("2.x.0".parse::<Version>().is_err());
    }

    #[test]
    fn new_ids_gate() {
        assert!(!is_new_action_id_supported(Version::new(2, 6, 10)));
        assert!(is_new_action_id_supported(Version::new(2, 6, 999)));
        assert!(is_new_action_id_supported(Version::new(2, 7, 0)));
        assert!(is_new_action_id_supported(Version::new(3, 0, 0)));
    }
}
