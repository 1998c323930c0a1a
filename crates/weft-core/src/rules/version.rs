//! Module and toolchain versions, and the interval syntax rules use to
//! scope themselves to a version span: `[v1.2.0,v1.5.0)`, `(,1.21]`, ...

use std::cmp::Ordering;
use std::fmt;

/// A Go module version (`v1.2.3`, `v0.0.0-2023...-abcdef`) or toolchain
/// version (`go1.22.1`, `1.22rc1`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub pre: Option<String>,
}

impl GoVersion {
    pub fn parse(raw: &str) -> Option<Self> {
        let s = raw.trim();
        let s = s
            .strip_prefix("go")
            .or_else(|| s.strip_prefix('v'))
            .unwrap_or(s);
        let s = s.split('+').next().unwrap_or(s);

        let (core, mut pre) = match s.split_once('-') {
            Some((core, pre)) => (core, Some(pre.to_string())),
            None => (s, None),
        };

        let mut nums = [0u64; 3];
        for (idx, part) in core.split('.').enumerate() {
            if idx >= 3 {
                return None;
            }
            // go1.22rc1 carries its pre-release tag glued to the minor
            let digits_end = part.find(|c: char| !c.is_ascii_digit()).unwrap_or(part.len());
            if digits_end == 0 {
                return None;
            }
            nums[idx] = part[..digits_end].parse().ok()?;
            if digits_end < part.len() {
                if pre.is_some() {
                    return None;
                }
                pre = Some(part[digits_end..].to_string());
            }
        }

        Some(Self {
            major: nums[0],
            minor: nums[1],
            patch: nums[2],
            pre,
        })
    }
}

impl Ord for GoVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => compare_prerelease(a, b),
            })
    }
}

/// Dot-separated identifiers compared pairwise, digit runs by value:
/// `rc9 < rc10`, `beta.2 < beta.10`, `1 < alpha`. A shorter list that is a
/// prefix of the other sorts first. Consistent with `Eq`: only identical
/// tags compare equal.
fn compare_prerelease(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.');
    let mut right = b.split('.');
    loop {
        match (left.next(), right.next()) {
            // equal by value but spelled differently (`rc.01`, `rc.1`)
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => match compare_identifier(x, y) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

fn compare_identifier(a: &str, b: &str) -> Ordering {
    let mut left = chunks(a).into_iter();
    let mut right = chunks(b).into_iter();
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => {
                let x_digits = x.starts_with(|c: char| c.is_ascii_digit());
                let y_digits = y.starts_with(|c: char| c.is_ascii_digit());
                match (x_digits, y_digits) {
                    (true, true) => compare_numeric(x, y),
                    (true, false) => Ordering::Less,
                    (false, true) => Ordering::Greater,
                    (false, false) => x.cmp(y),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

/// Digit strings by value, without overflowing on long timestamps.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

/// `rc10` → `["rc", "10"]`
fn chunks(identifier: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = None;
    for (idx, c) in identifier.char_indices() {
        let digit = c.is_ascii_digit();
        if in_digits.is_some_and(|d| d != digit) {
            out.push(&identifier[start..idx]);
            start = idx;
        }
        in_digits = Some(digit);
    }
    if start < identifier.len() {
        out.push(&identifier[start..]);
    }
    out
}

impl PartialOrd for GoVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for GoVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: GoVersion,
    inclusive: bool,
}

/// Interval of versions; either end may be open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl VersionRange {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let s = raw.trim();
        let lower_inclusive = match s.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(format!("version range {raw:?} must start with '[' or '('")),
        };
        let upper_inclusive = match s.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(format!("version range {raw:?} must end with ']' or ')'")),
        };
        let inner = &s[1..s.len() - 1];
        let Some((lo, hi)) = inner.split_once(',') else {
            return Err(format!("version range {raw:?} must contain a comma"));
        };

        let bound = |text: &str, inclusive: bool| -> Result<Option<Bound>, String> {
            let text = text.trim();
            if text.is_empty() {
                return Ok(None);
            }
            GoVersion::parse(text)
                .map(|version| Some(Bound { version, inclusive }))
                .ok_or_else(|| format!("invalid version {text:?} in range {raw:?}"))
        };

        let lower = bound(lo, lower_inclusive)?;
        let upper = bound(hi, upper_inclusive)?;
        if let (Some(l), Some(u)) = (&lower, &upper) {
            if l.version > u.version {
                return Err(format!("version range {raw:?} is empty"));
            }
        }

        Ok(Self {
            raw: s.to_string(),
            lower,
            upper,
        })
    }

    pub fn contains(&self, version: &GoVersion) -> bool {
        let above = self.lower.as_ref().map_or(true, |b| {
            if b.inclusive {
                version >= &b.version
            } else {
                version > &b.version
            }
        });
        let below = self.upper.as_ref().map_or(true, |b| {
            if b.inclusive {
                version <= &b.version
            } else {
                version < &b.version
            }
        });
        above && below
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> GoVersion {
        GoVersion::parse(s).unwrap()
    }

    #[test]
    fn test_parse_module_and_toolchain_versions() {
        assert_eq!(v("v1.2.3"), GoVersion { major: 1, minor: 2, patch: 3, pre: None });
        assert_eq!(v("go1.22"), v("v1.22.0"));
        assert_eq!(v("1.22rc1").pre.as_deref(), Some("rc1"));
        assert!(GoVersion::parse("latest").is_none());
        assert!(GoVersion::parse("v1.2.3.4").is_none());
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        assert!(v("v1.5.0-beta.1") < v("v1.5.0"));
        assert!(v("go1.22rc1") < v("go1.22.0"));
        assert!(v("v0.0.0-20230101000000-abcdef") < v("v0.1.0"));
    }

    #[test]
    fn test_prerelease_numbers_compare_by_value() {
        assert!(v("go1.22rc9") < v("go1.22rc10"));
        assert!(v("v1.5.0-beta.2") < v("v1.5.0-beta.10"));
        assert!(v("v1.5.0-alpha") < v("v1.5.0-alpha.1"));
        assert!(v("v1.5.0-1") < v("v1.5.0-alpha"));
        assert!(v("v1.5.0-rc.1") > v("v1.5.0-beta.11"));
        assert_ne!(v("v1.5.0-rc.01").cmp(&v("v1.5.0-rc.1")), Ordering::Equal);
    }

    #[test]
    fn test_half_open_range() {
        let range = VersionRange::parse("[1.0.0,1.5.0)").unwrap();
        assert!(range.contains(&v("v1.0.0")));
        assert!(range.contains(&v("v1.4.9")));
        assert!(!range.contains(&v("v1.5.0")));
        assert!(!range.contains(&v("v0.9.0")));
    }

    #[test]
    fn test_open_ended_ranges() {
        let range = VersionRange::parse("[1.18,)").unwrap();
        assert!(range.contains(&v("go1.23.4")));
        let range = VersionRange::parse("(,v2.0.0]").unwrap();
        assert!(range.contains(&v("v2.0.0")));
        assert!(!range.contains(&v("v2.0.1")));
    }

    #[test]
    fn test_malformed_ranges() {
        assert!(VersionRange::parse("1.0.0").is_err());
        assert!(VersionRange::parse("[1.0.0)").is_err());
        assert!(VersionRange::parse("[2.0.0,1.0.0)").is_err());
        assert!(VersionRange::parse("[x,1.0.0)").is_err());
    }
}
