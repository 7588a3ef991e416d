use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::error::Error;

/// The members of a group an operation runs on, by zero-based position in the
/// member list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum TargetSpec {
    All,
    /// Sorted and free of duplicates.
    Indices(Vec<usize>),
}

impl Default for TargetSpec {
    fn default() -> Self {
        TargetSpec::All
    }
}

impl TargetSpec {
    pub fn indices(indices: impl IntoIterator<Item = usize>) -> Self {
        let mut indices: Vec<usize> = indices.into_iter().collect();
        indices.sort_unstable();
        indices.dedup();
        TargetSpec::Indices(indices)
    }

    /// The highest position referenced, if any.
    pub fn max_index(&self) -> Option<usize> {
        match self {
            TargetSpec::All => None,
            TargetSpec::Indices(indices) => indices.last().copied(),
        }
    }

    pub fn resolve(&self, count: usize) -> Vec<usize> {
        match self {
            TargetSpec::All => (0..count).collect(),
            TargetSpec::Indices(indices) => indices.clone(),
        }
    }
}

impl FromStr for TargetSpec {
    type Err = Error;

    fn from_str(spec: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| Error::TargetSpec {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };
        let parse = |n: &str| {
            n.trim()
                .parse::<usize>()
                .map_err(|_| invalid(&format!("'{}' is not a non-negative index", n.trim())))
        };

        let trimmed = spec.trim();
        if trimmed.eq_ignore_ascii_case("all") {
            return Ok(TargetSpec::All);
        }
        if trimmed.is_empty() {
            return Err(invalid("empty"));
        }

        let mut indices = Vec::new();
        for part in trimmed.split(',') {
            match part.split_once('-') {
                Some((from, to)) => {
                    let (from, to) = (parse(from)?, parse(to)?);
                    if from > to {
                        return Err(invalid(&format!("range {}-{} is reversed", from, to)));
                    }
                    indices.extend(from..=to);
                }
                None => indices.push(parse(part)?),
            }
        }
        Ok(TargetSpec::indices(indices))
    }
}

impl TryFrom<String> for TargetSpec {
    type Error = Error;

    fn try_from(spec: String) -> Result<Self, Self::Error> {
        spec.parse()
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TargetSpec::All => f.write_str("all"),
            TargetSpec::Indices(indices) => {
                let parts: Vec<String> = indices.iter().map(|i| i.to_string()).collect();
                f.write_str(&parts.join(","))
            }
        }
    }
}
