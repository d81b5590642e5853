//! CPU sets in the kernel list format
//!
//! cgroup files such as `cpuset.cpus` and the container resource spec describe
//! CPUs as a list of ranges:
//!
//! ```text
//! "0-3,7,9-10"  →  {0, 1, 2, 3, 7, 9, 10}
//! ```
//!
//! `CpuSet` is the parsed form. Printing it always yields the canonical list
//! (contiguous runs collapsed into `a-b`), so `parse(s).to_string() == s` holds
//! for every canonical `s`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Error returned when a CPU list cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCpuSetError {
    input: String,
    reason: String,
}

impl ParseCpuSetError {
    fn new(input: &str, reason: impl Into<String>) -> Self {
        Self {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ParseCpuSetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to parse cpuset {:?}: {}", self.input, self.reason)
    }
}

impl std::error::Error for ParseCpuSetError {}

/// An immutable set of CPU indices
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CpuSet {
    cpus: BTreeSet<usize>,
}

impl CpuSet {
    /// Build an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a CPU list such as `0-3,7`
    ///
    /// Surrounding whitespace and trailing NULs (as read from sysfs) are
    /// ignored and an empty string yields the empty set.
    pub fn parse(cpulist: &str) -> Result<Self, ParseCpuSetError> {
        let trimmed = cpulist.trim_end_matches('\0').trim();
        let mut cpus = BTreeSet::new();
        if trimmed.is_empty() {
            return Ok(Self { cpus });
        }

        for group in trimmed.split(',') {
            let group = group.trim();
            let (min, max) = match group.split_once('-') {
                Some((lo, hi)) => (parse_cpu(cpulist, lo)?, parse_cpu(cpulist, hi)?),
                None => {
                    let cpu = parse_cpu(cpulist, group)?;
                    (cpu, cpu)
                }
            };
            if min > max {
                return Err(ParseCpuSetError::new(
                    cpulist,
                    format!("range {}-{} is reversed", min, max),
                ));
            }
            cpus.extend(min..=max);
        }

        Ok(Self { cpus })
    }

    pub fn len(&self) -> usize {
        self.cpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cpus.is_empty()
    }

    pub fn contains(&self, cpu: usize) -> bool {
        self.cpus.contains(&cpu)
    }

    /// CPUs in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.cpus.iter().copied()
    }

    pub fn union(&self, other: &CpuSet) -> CpuSet {
        self.cpus.union(&other.cpus).copied().collect()
    }

    pub fn difference(&self, other: &CpuSet) -> CpuSet {
        self.cpus.difference(&other.cpus).copied().collect()
    }

    pub fn intersection(&self, other: &CpuSet) -> CpuSet {
        self.cpus.intersection(&other.cpus).copied().collect()
    }
}

fn parse_cpu(input: &str, token: &str) -> Result<usize, ParseCpuSetError> {
    token
        .trim()
        .parse::<usize>()
        .map_err(|_| ParseCpuSetError::new(input, format!("invalid cpu {:?}", token)))
}

impl FromStr for CpuSet {
    type Err = ParseCpuSetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CpuSet::parse(s)
    }
}

impl FromIterator<usize> for CpuSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        Self {
            cpus: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut iter = self.cpus.iter().copied().peekable();
        while let Some(start) = iter.next() {
            let mut end = start;
            while iter.peek() == Some(&(end + 1)) {
                end += 1;
                iter.next();
            }
            if !first {
                f.write_str(",")?;
            }
            first = false;
            if start == end {
                write!(f, "{}", start)?;
            } else {
                write!(f, "{}-{}", start, end)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_round_trip() {
        for s in ["", "0", "0-3", "0,2", "0-1,3,5-9", "1,3-4,63-64,127"] {
            assert_eq!(CpuSet::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn test_non_canonical_input_is_normalized() {
        let set = CpuSet::parse(" 3,0-1,2\n").unwrap();
        assert_eq!(set.to_string(), "0-3");
        assert_eq!(CpuSet::parse("4-4").unwrap().to_string(), "4");
        assert_eq!(CpuSet::parse("0-3\0").unwrap().len(), 4);
    }

    #[test]
    fn test_rejects_malformed_lists() {
        assert!(CpuSet::parse("a").is_err());
        assert!(CpuSet::parse("5-3").is_err());
        assert!(CpuSet::parse("1,,2").is_err());
        assert!(CpuSet::parse("-1").is_err());
        assert!(CpuSet::parse("1-").is_err());
    }

    #[test]
    fn test_set_operations() {
        let a = CpuSet::parse("0-3").unwrap();
        let b = CpuSet::parse("2-5").unwrap();

        assert_eq!(a.union(&b).to_string(), "0-5");
        assert_eq!(a.union(&b), b.union(&a));
        assert_eq!(a.difference(&b).to_string(), "0-1");
        assert_eq!(a.intersection(&b).to_string(), "2-3");

        // union(A, B) \ A covers B \ A
        let added = a.union(&b).difference(&a);
        assert_eq!(added, b.difference(&a));
    }

    #[test]
    fn test_from_str_and_iter() {
        let set: CpuSet = "7,1-2".parse().unwrap();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![1, 2, 7]);
        assert!(set.contains(7));
        assert!(!set.contains(3));
        assert!(CpuSet::new().is_empty());
    }
}
