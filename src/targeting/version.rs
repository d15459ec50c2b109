//! Client version parsing and catalog range expressions.
//!
//! Versions are dotted sequences. Each segment compares by its leading number
//! first and then by any text suffix, with a suffixed segment sorting before
//! the bare number, so `10.0b2 < 10.0 < 10.1` and `58.0-alpha < 58.0`. Ranges follow the small grammar used
//! by catalog `browsers` maps:
//!
//! - `*` matches every version
//! - `9` matches `9`, `9.0`, `9.1.4` (prefix match)
//! - `>=45`, `>4.2`, `<10`, `<=9`, `=12` and space-separated combinations
//! - `6 - 8` inclusive hyphen ranges
//! - alternatives joined with `||` or `,` (enumerated lists)

use anyhow::{Result, anyhow, bail};
use std::cmp::Ordering;
use std::fmt;

/// One dotted component: a leading number and an optional text suffix.
///
/// `0b2` is `(0, "b2")`, `alpha` is `(none, "alpha")`. Numbers compare first
/// (a missing number counts as 0); on a tie a suffixed segment sorts before
/// the bare number, so `10.0b2 < 10.0 < 10.1`.
#[derive(Clone, Debug)]
struct Segment {
    number: Option<u64>,
    suffix: String,
}

impl Segment {
    fn parse(raw: &str) -> Option<Self> {
        let split = raw
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(raw.len());
        let (digits, suffix) = raw.split_at(split);
        let number = if digits.is_empty() {
            None
        } else {
            Some(digits.parse::<u64>().ok()?)
        };
        Some(Segment {
            number,
            suffix: suffix.to_ascii_lowercase(),
        })
    }
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        self.number
            .unwrap_or(0)
            .cmp(&other.number.unwrap_or(0))
            .then_with(|| match (self.suffix.is_empty(), other.suffix.is_empty()) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => self.suffix.cmp(&other.suffix),
            })
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Segment {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Segment {}

static ZERO: Segment = Segment {
    number: Some(0),
    suffix: String::new(),
};

/// Parsed client or catalog version.
#[derive(Clone, Debug)]
pub struct Version {
    core: Vec<Segment>,
    pre: Vec<Segment>,
}

impl Version {
    /// Parse a dotted version, returning `None` for empty or malformed input.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let trimmed = trimmed
            .strip_prefix('v')
            .or_else(|| trimmed.strip_prefix('V'))
            .unwrap_or(trimmed);
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return None;
        }

        let (core_raw, pre_raw) = match trimmed.split_once('-') {
            Some((core, pre)) => (core, Some(pre)),
            None => (trimmed, None),
        };

        let core = split_segments(core_raw)?;
        let pre = match pre_raw {
            Some(pre) => split_segments(pre)?,
            None => Vec::new(),
        };
        Some(Version { core, pre })
    }

    /// True when every segment of `pattern` equals the matching segment here.
    ///
    /// A pattern without a pre-release matches any pre-release of the same core
    /// prefix, so `58` matches `58.0-beta`.
    pub fn matches_prefix(&self, pattern: &Version) -> bool {
        let core_matches = pattern
            .core
            .iter()
            .enumerate()
            .all(|(idx, segment)| self.core.get(idx).unwrap_or(&ZERO) == segment);
        core_matches && (pattern.pre.is_empty() || pattern.pre == self.pre)
    }
}

fn split_segments(raw: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    for part in raw.split('.') {
        if part.is_empty() {
            return None;
        }
        segments.push(Segment::parse(part)?);
    }
    Some(segments)
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.core.len().max(other.core.len());
        for idx in 0..width {
            let left = self.core.get(idx).unwrap_or(&ZERO);
            let right = other.core.get(idx).unwrap_or(&ZERO);
            match left.cmp(right) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }

        match (self.pre.is_empty(), other.pre.is_empty()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) => self.pre.cmp(&other.pre),
        }
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_segments(f, &self.core)?;
        if !self.pre.is_empty() {
            f.write_str("-")?;
            write_segments(f, &self.pre)?;
        }
        Ok(())
    }
}

fn write_segments(f: &mut fmt::Formatter<'_>, segments: &[Segment]) -> fmt::Result {
    for (idx, segment) in segments.iter().enumerate() {
        if idx > 0 {
            f.write_str(".")?;
        }
        if let Some(number) = segment.number {
            write!(f, "{number}")?;
        }
        f.write_str(&segment.suffix)?;
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Exact,
    Greater,
    GreaterEq,
    Less,
    LessEq,
}

#[derive(Clone, Debug)]
struct Comparator {
    op: Op,
    version: Version,
}

impl Comparator {
    fn parse(token: &str) -> Result<Self> {
        let (op, rest) = if let Some(rest) = token.strip_prefix(">=") {
            (Op::GreaterEq, rest)
        } else if let Some(rest) = token.strip_prefix("<=") {
            (Op::LessEq, rest)
        } else if let Some(rest) = token.strip_prefix('>') {
            (Op::Greater, rest)
        } else if let Some(rest) = token.strip_prefix('<') {
            (Op::Less, rest)
        } else if let Some(rest) = token.strip_prefix('=') {
            (Op::Exact, rest)
        } else {
            (Op::Exact, token)
        };
        let version =
            Version::parse(rest).ok_or_else(|| anyhow!("invalid version '{rest}' in '{token}'"))?;
        Ok(Comparator { op, version })
    }

    // Partial bounds cover their whole prefix: `<=9` admits 9.5, `>9` does not.
    fn matches(&self, client: &Version) -> bool {
        let prefix = client.matches_prefix(&self.version);
        match self.op {
            Op::Exact => prefix,
            Op::GreaterEq => prefix || *client > self.version,
            Op::Greater => !prefix && *client > self.version,
            Op::LessEq => prefix || *client < self.version,
            Op::Less => !prefix && *client < self.version,
        }
    }
}

#[derive(Clone, Debug)]
enum Alternative {
    Any,
    Between(Version, Version),
    All(Vec<Comparator>),
}

impl Alternative {
    fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            bail!("empty alternative");
        }
        if matches!(trimmed, "*" | "x" | "X") {
            return Ok(Alternative::Any);
        }
        if let Some((low, high)) = trimmed.split_once(" - ") {
            let low = Version::parse(low)
                .ok_or_else(|| anyhow!("invalid lower bound '{}'", low.trim()))?;
            let high = Version::parse(high)
                .ok_or_else(|| anyhow!("invalid upper bound '{}'", high.trim()))?;
            return Ok(Alternative::Between(low, high));
        }

        let mut comparators = Vec::new();
        let mut pending_op: Option<&str> = None;
        for token in trimmed.split_whitespace() {
            if matches!(token, ">=" | "<=" | ">" | "<" | "=") {
                if pending_op.is_some() {
                    bail!("dangling operator in '{trimmed}'");
                }
                pending_op = Some(token);
                continue;
            }
            let comparator = match pending_op.take() {
                Some(op) => Comparator::parse(&format!("{op}{token}"))?,
                None => Comparator::parse(token)?,
            };
            comparators.push(comparator);
        }
        if pending_op.is_some() {
            bail!("dangling operator in '{trimmed}'");
        }
        Ok(Alternative::All(comparators))
    }

    fn matches(&self, client: &Version) -> bool {
        match self {
            Alternative::Any => true,
            Alternative::Between(low, high) => {
                *client >= *low && (*client <= *high || client.matches_prefix(high))
            }
            Alternative::All(comparators) => comparators.iter().all(|c| c.matches(client)),
        }
    }
}

/// Parsed `browsers` range expression for one client family.
#[derive(Clone, Debug)]
pub struct VersionRange {
    raw: String,
    alternatives: Vec<Alternative>,
}

impl VersionRange {
    pub fn parse(raw: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for group in raw.split("||") {
            for part in group.split(',') {
                let alternative = Alternative::parse(part)
                    .map_err(|err| anyhow!("invalid version range '{raw}': {err}"))?;
                alternatives.push(alternative);
            }
        }
        Ok(VersionRange {
            raw: raw.trim().to_string(),
            alternatives,
        })
    }

    pub fn satisfied_by(&self, client: &Version) -> bool {
        self.alternatives.iter().any(|alt| alt.matches(client))
    }

    /// Expression as written in the catalog.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}
