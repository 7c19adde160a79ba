//! Match policies: decide which registration, if any, a query vector belongs to.
//!
//! Matching is a pure function over its inputs. A candidate qualifies when its
//! Euclidean distance to the query is `<= tolerance`. Candidates whose vector
//! length differs from the query never qualify, and neither do candidates whose
//! distance is not a finite number.

use crate::types::{FeatureVector, Registration};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Strategy for picking a registration for a query vector.
pub trait Matcher: Send + Sync {
    /// Return the identifier of the chosen candidate, or `None` for no match.
    fn find_match<'a>(
        &self,
        query: &FeatureVector,
        candidates: &'a [Registration],
        tolerance: f32,
    ) -> Option<&'a str>;
}

/// Distance from `query` to `candidate`, or `None` if it cannot qualify.
fn qualifying_distance(query: &FeatureVector, candidate: &Registration, tolerance: f32) -> Option<f32> {
    let distance = query.euclidean_distance(&candidate.vector)?;
    (distance.is_finite() && distance <= tolerance).then_some(distance)
}

/// Returns the first candidate, in input order, within tolerance.
///
/// The result depends on candidate order when several registrations are
/// within tolerance of the same query: a later, closer candidate is never
/// considered once an earlier one qualifies.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstMatch;

impl Matcher for FirstMatch {
    fn find_match<'a>(
        &self,
        query: &FeatureVector,
        candidates: &'a [Registration],
        tolerance: f32,
    ) -> Option<&'a str> {
        candidates
            .iter()
            .find(|c| qualifying_distance(query, c, tolerance).is_some())
            .map(|c| c.user_id.as_str())
    }
}

/// Returns the candidate with the smallest distance within tolerance.
///
/// Scans every candidate. On an exact distance tie the earlier candidate wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClosestMatch;

impl Matcher for ClosestMatch {
    fn find_match<'a>(
        &self,
        query: &FeatureVector,
        candidates: &'a [Registration],
        tolerance: f32,
    ) -> Option<&'a str> {
        let mut best: Option<(f32, &'a Registration)> = None;
        for candidate in candidates {
            let Some(distance) = qualifying_distance(query, candidate, tolerance) else {
                continue;
            };
            if best.map_or(true, |(d, _)| distance < d) {
                best = Some((distance, candidate));
            }
        }
        best.map(|(_, c)| c.user_id.as_str())
    }
}

/// Configured match policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MatchPolicy {
    #[default]
    First,
    Closest,
}

impl MatchPolicy {
    pub fn matcher(self) -> Box<dyn Matcher> {
        match self {
            MatchPolicy::First => Box::new(FirstMatch),
            MatchPolicy::Closest => Box::new(ClosestMatch),
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("unknown match policy {0:?} (expected \"first\" or \"closest\")")]
pub struct UnknownPolicy(pub String);

impl FromStr for MatchPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchPolicy::First),
            "closest" => Ok(MatchPolicy::Closest),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for MatchPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchPolicy::First => f.write_str("first"),
            MatchPolicy::Closest => f.write_str("closest"),
        }
    }
}
