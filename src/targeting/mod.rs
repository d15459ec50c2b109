//! Client targeting: deciding whether a client already ships a capability.
//!
//! The evaluator consumes a normalized [`ClientTarget`] (or none, when the raw
//! identifier was missing or unparsable) and answers per capability. Missing
//! support data for the client's family is treated as "not supported" so the
//! polyfill is delivered.

pub mod version;

pub use version::{Version, VersionRange};

use crate::catalog::{Capability, Flag, FlagSet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Normalized client identity: lowercase family plus parsed version.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientTarget {
    pub family: String,
    pub version: Version,
}

impl ClientTarget {
    pub fn new(family: &str, version: Version) -> Self {
        ClientTarget {
            family: family.trim().to_ascii_lowercase(),
            version,
        }
    }
}

impl fmt::Display for ClientTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.family, self.version)
    }
}

/// Turns a raw client identifier into a [`ClientTarget`].
///
/// Failure to parse is reported as `None`, which the evaluator routes through
/// [`UnknownPolicy`].
pub trait ClientNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> Option<ClientTarget>;
}

/// Accepts pre-normalized identifiers of the form `family/version` (or
/// `family version`), e.g. `chrome/45`, `ie/9`, `safari/10.1`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FamilyVersionNormalizer;

impl ClientNormalizer for FamilyVersionNormalizer {
    fn normalize(&self, raw: &str) -> Option<ClientTarget> {
        let trimmed = raw.trim();
        let (family, version) = trimmed
            .split_once('/')
            .or_else(|| trimmed.split_once(char::is_whitespace))?;
        let family = family.trim();
        if family.is_empty()
            || !family
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        {
            return None;
        }
        if version.contains('/') {
            return None;
        }
        let version = Version::parse(&version.trim().replace('_', "."))?;
        Some(ClientTarget::new(family, version))
    }
}

/// What to do when the client identifier could not be normalized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Treat everything as natively supported; nothing is delivered.
    Ignore,
    /// Treat nothing as supported; deliver the full closure, gated.
    #[default]
    Polyfill,
}

impl UnknownPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            UnknownPolicy::Ignore => "ignore",
            UnknownPolicy::Polyfill => "polyfill",
        }
    }
}

impl std::str::FromStr for UnknownPolicy {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "ignore" => Ok(UnknownPolicy::Ignore),
            "polyfill" => Ok(UnknownPolicy::Polyfill),
            other => anyhow::bail!("unknown policy must be 'ignore' or 'polyfill', got '{other}'"),
        }
    }
}

/// Per-request targeting decisions against one client.
#[derive(Clone, Copy, Debug)]
pub struct TargetingEvaluator<'a> {
    client: Option<&'a ClientTarget>,
    policy: UnknownPolicy,
}

impl<'a> TargetingEvaluator<'a> {
    pub fn new(client: Option<&'a ClientTarget>, policy: UnknownPolicy) -> Self {
        TargetingEvaluator { client, policy }
    }

    /// True when the client is unknown and the policy delivers nothing.
    pub fn ignores_everything(&self) -> bool {
        self.client.is_none() && self.policy == UnknownPolicy::Ignore
    }

    /// True when the client is unknown and the policy delivers everything.
    pub fn polyfills_everything(&self) -> bool {
        self.client.is_none() && self.policy == UnknownPolicy::Polyfill
    }

    /// Whether the client's runtime already provides `capability`.
    pub fn is_natively_supported(&self, capability: &Capability) -> bool {
        let Some(client) = self.client else {
            return self.policy == UnknownPolicy::Ignore;
        };
        match capability.support.get(&client.family) {
            Some(range) => range.satisfied_by(&client.version),
            None => false,
        }
    }

    /// Whether resolution should leave `capability` out for this client.
    ///
    /// `always` (from the catalog or the request) overrides native support for
    /// known clients; an ignored unknown client still gets nothing.
    pub fn skips(&self, capability: &Capability, flags: &FlagSet) -> bool {
        if self.client.is_none() {
            return self.ignores_everything();
        }
        !flags.contains(&Flag::Always) && self.is_natively_supported(capability)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CapabilityName, SourceRef};
    use std::collections::BTreeMap;

    fn capability(support: &[(&str, &str)], flags: &[Flag]) -> Capability {
        let name = CapabilityName::from("Promise");
        Capability {
            source: SourceRef::for_capability(&name),
            name,
            dependencies: Vec::new(),
            flags: flags.iter().cloned().collect(),
            support: support
                .iter()
                .map(|(family, range)| (family.to_string(), VersionRange::parse(range).unwrap()))
                .collect::<BTreeMap<_, _>>(),
            detect: None,
            license: None,
        }
    }

    #[test]
    fn normalizer_accepts_family_version_pairs() {
        let normalizer = FamilyVersionNormalizer;
        let chrome = normalizer.normalize("Chrome/45").expect("chrome parses");
        assert_eq!(chrome.family, "chrome");
        assert_eq!(chrome.version, Version::parse("45").unwrap());
        let safari = normalizer.normalize("safari 10_1").expect("safari parses");
        assert_eq!(safari.to_string(), "safari/10.1");
    }

    #[test]
    fn normalizer_reports_unparsable_as_absent() {
        let normalizer = FamilyVersionNormalizer;
        let malformed = [
            "",
            "   ",
            "chrome",
            "/45",
            "chrome/",
            "chrome/45/extra",
            "Mozilla/5.0 (X11; Linux)",
        ];
        for raw in malformed {
            assert!(normalizer.normalize(raw).is_none(), "{raw:?} should not parse");
        }
    }

    #[test]
    fn known_client_uses_support_ranges() {
        let cap = capability(&[("chrome", ">=33")], &[]);
        let chrome45 = FamilyVersionNormalizer.normalize("chrome/45").unwrap();
        let chrome30 = FamilyVersionNormalizer.normalize("chrome/30").unwrap();
        let ie9 = FamilyVersionNormalizer.normalize("ie/9").unwrap();

        let eval = TargetingEvaluator::new(Some(&chrome45), UnknownPolicy::Polyfill);
        assert!(eval.is_natively_supported(&cap));
        assert!(eval.skips(&cap, &cap.flags));

        let eval = TargetingEvaluator::new(Some(&chrome30), UnknownPolicy::Ignore);
        assert!(!eval.is_natively_supported(&cap));

        // No data for the family means the polyfill is needed.
        let eval = TargetingEvaluator::new(Some(&ie9), UnknownPolicy::Ignore);
        assert!(!eval.is_natively_supported(&cap));
    }

    #[test]
    fn always_flag_overrides_native_support() {
        let cap = capability(&[("chrome", "*")], &[Flag::Always]);
        let chrome = FamilyVersionNormalizer.normalize("chrome/90").unwrap();
        let eval = TargetingEvaluator::new(Some(&chrome), UnknownPolicy::Polyfill);
        assert!(eval.is_natively_supported(&cap));
        assert!(!eval.skips(&cap, &cap.flags));
    }

    #[test]
    fn unknown_client_follows_policy() {
        let cap = capability(&[("chrome", "*")], &[Flag::Always]);
        let ignore = TargetingEvaluator::new(None, UnknownPolicy::Ignore);
        assert!(ignore.skips(&cap, &cap.flags));
        assert!(ignore.ignores_everything());

        let polyfill = TargetingEvaluator::new(None, UnknownPolicy::default());
        assert!(!polyfill.skips(&cap, &FlagSet::new()));
        assert!(polyfill.polyfills_everything());
    }

    #[test]
    fn policy_parses_from_strings() {
        assert_eq!("ignore".parse::<UnknownPolicy>().unwrap(), UnknownPolicy::Ignore);
        assert!("maybe".parse::<UnknownPolicy>().is_err());
        let parsed: UnknownPolicy = serde_json::from_str("\"polyfill\"").unwrap();
        assert_eq!(parsed, UnknownPolicy::Polyfill);
    }
}
