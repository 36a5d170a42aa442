//! Run and promotion identifiers.
//!
//! `Id<T>` wraps a ULID and carries a zero-sized marker so a [`RunId`] can
//! never be passed where a [`PromotionId`] is expected. ULIDs sort by
//! creation time, which keeps run ids in the state file ordered.

use std::fmt;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Prefix used when an id is displayed.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid.to_string().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Run {}

impl IdMarker for Run {
    fn prefix() -> &'static str {
        "run-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Promotion {}

impl IdMarker for Promotion {
    fn prefix() -> &'static str {
        "promotion-"
    }
}

/// Identifier of one pipeline run.
pub type RunId = Id<Run>;

/// Identifier of one promotion invocation.
pub type PromotionId = Id<Promotion>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let run = RunId::from_ulid(Ulid::new());
        let promotion = PromotionId::from_ulid(Ulid::new());

        assert!(run.to_string().starts_with("run-"));
        assert!(promotion.to_string().starts_with("promotion-"));
        // lowercase so it is usable as a name in `$(context.pipelineRun.name)`
        assert_eq!(run.to_string(), run.to_string().to_lowercase());
    }

    #[test]
    fn ids_round_trip_through_json() {
        let run = RunId::from_ulid(Ulid::new());
        let json = serde_json::to_string(&run).unwrap();
        let back: RunId = serde_json::from_str(&json).unwrap();
        assert_eq!(run, back);
    }

    #[test]
    fn marker_is_zero_sized() {
        assert_eq!(std::mem::size_of::<RunId>(), std::mem::size_of::<Ulid>());
    }
}
