use std::cmp::Ordering;
use std::fmt;

/// One dot-separated piece of a version string
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment<'a> {
    Numeric(u64),
    Text(&'a str),
}

impl<'a> Segment<'a> {
    fn parse(raw: &'a str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u64>() {
            Ok(n) => Segment::Numeric(n),
            Err(_) => Segment::Text(trimmed),
        }
    }
}

impl Ord for Segment<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Segment::Numeric(a), Segment::Numeric(b)) => a.cmp(b),
            // Anything unparseable loses to a number
            (Segment::Text(_), Segment::Numeric(_)) => Ordering::Less,
            (Segment::Numeric(_), Segment::Text(_)) => Ordering::Greater,
            (Segment::Text(a), Segment::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Segment<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two plugin version strings, best effort.
///
/// Versions are split on `.`, surrounding whitespace is ignored and each
/// segment is compared numerically. The shorter version is padded with `0`
/// segments, so `"1.1" == "1.1.0.0"`. A segment that is not a number sorts
/// below any numeric segment, so `"#$%" < "1.0"`.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let left: Vec<Segment<'_>> = a.split('.').map(Segment::parse).collect();
    let right: Vec<Segment<'_>> = b.split('.').map(Segment::parse).collect();
    let len = left.len().max(right.len());
    let zero = Segment::Numeric(0);

    for i in 0..len {
        let l = left.get(i).unwrap_or(&zero);
        let r = right.get(i).unwrap_or(&zero);
        match l.cmp(r) {
            Ordering::Equal => continue,
            unequal => return unequal,
        }
    }
    Ordering::Equal
}

/// A plugin version string ordered by [`compare_versions`]
#[derive(Debug, Clone)]
pub struct PluginVersion(String);

impl PluginVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for PluginVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PluginVersion {}

impl PartialOrd for PluginVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PluginVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_versions(&self.0, &other.0)
    }
}

impl fmt::Display for PluginVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PluginVersion {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
