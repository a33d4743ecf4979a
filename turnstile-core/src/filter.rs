// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dimensional filters and their canonical combination keys.
//!
//! A [`Filter`] is the flat set of (dimension, value) tags a caller attaches
//! to an increment. The engine never stores filters directly; it expands each
//! one into the full powerset of its populated dimensions — every subset,
//! down to the empty one — and applies the increment to each resulting
//! [`CombinationKey`]. That is what lets the reporting layer later query any
//! combination of dimensions (`{State=CA}`, `{State=CA,StoreID=3234}`, or the
//! unfiltered total) by reading a single key's snapshots, with no
//! re-aggregation.
//!
//! Expansion is exponential: a filter with `k` populated dimensions produces
//! `2^k` keys, and every increment touches all of them. Callers are expected
//! to keep filters narrow (single digits); [`MAX_FILTER_DIMENSIONS`] is a
//! hard backstop, not a target.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use crate::error::TrackError;

/// Hard upper bound on populated dimensions per filter.
///
/// A filter at the limit already expands to 1024 combination keys per
/// increment.
pub const MAX_FILTER_DIMENSIONS: usize = 10;

type Dim = (Arc<str>, Arc<str>);

/// A flat set of named string tags attached to an increment.
///
/// Dimensions are kept sorted by name and deduplicated (the last value set
/// for a name wins), so two filters that populate the same dimensions with
/// the same values compare equal regardless of insertion order. Setting a
/// dimension to an empty value leaves it unpopulated, which lets callers map
/// optional struct fields straight onto a filter:
///
/// ```
/// use turnstile_core::Filter;
///
/// let filter = Filter::new()
///     .with("StoreID", "3234")
///     .with("State", "CA")
///     .with("Gender", ""); // unpopulated, not part of the filter
///
/// assert_eq!(filter.len(), 2);
/// assert_eq!(filter, Filter::new().with("State", "CA").with("StoreID", "3234"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    // sorted by dimension name
    dims: SmallVec<[Dim; 4]>,
}

impl Filter {
    /// An empty filter: the increment counts only toward the global total.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a dimension, consuming and returning the filter for chaining.
    ///
    /// An empty `value` is treated as "not populated" and ignored.
    pub fn with(mut self, dimension: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.set(dimension, value);
        self
    }

    /// Set a dimension in place. An empty `value` is ignored.
    pub fn set(&mut self, dimension: impl AsRef<str>, value: impl AsRef<str>) {
        let value = value.as_ref();
        if value.is_empty() {
            return;
        }
        let dimension = dimension.as_ref();
        match self.dims.binary_search_by(|(d, _)| (**d).cmp(dimension)) {
            Ok(i) => self.dims[i].1 = Arc::from(value),
            Err(i) => self.dims.insert(i, (Arc::from(dimension), Arc::from(value))),
        }
    }

    /// Number of populated dimensions.
    pub fn len(&self) -> usize {
        self.dims.len()
    }

    /// True if no dimension is populated.
    pub fn is_empty(&self) -> bool {
        self.dims.is_empty()
    }

    /// The populated dimensions, sorted by name.
    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.dims.iter().map(|(d, v)| (&**d, &**v))
    }

    /// Expand this filter into the canonical set of combination keys.
    ///
    /// Produces all `2^k` subsets of the `k` populated dimensions, including
    /// the empty key, in a deterministic order (subsets of the name-sorted
    /// dimension list, in ascending bitmask order, so the empty key is always
    /// first and the full combination always last). Identical filters always
    /// expand to identical keys in identical order.
    ///
    /// Fails, touching nothing, if a dimension name is empty or the filter
    /// exceeds [`MAX_FILTER_DIMENSIONS`].
    pub fn combinations(&self) -> Result<SmallVec<[CombinationKey; 8]>, TrackError> {
        if self.dims.len() > MAX_FILTER_DIMENSIONS {
            return Err(TrackError::TooManyDimensions {
                populated: self.dims.len(),
                limit: MAX_FILTER_DIMENSIONS,
            });
        }
        if let Some((_, value)) = self.dims.iter().find(|(d, _)| d.is_empty()) {
            return Err(TrackError::InvalidDimension(format!(
                "empty dimension name (value `{value}`)"
            )));
        }

        let k = self.dims.len() as u32;
        let mut keys = SmallVec::with_capacity(1 << k);
        for mask in 0u32..(1 << k) {
            let pairs = self
                .dims
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, dim)| dim.clone())
                .collect();
            keys.push(CombinationKey { pairs });
        }
        Ok(keys)
    }
}

impl<D: AsRef<str>, V: AsRef<str>> FromIterator<(D, V)> for Filter {
    fn from_iter<I: IntoIterator<Item = (D, V)>>(iter: I) -> Self {
        let mut filter = Filter::new();
        for (dimension, value) in iter {
            filter.set(dimension, value);
        }
        filter
    }
}

/// Canonical identifier for one subset of a filter's populated dimensions.
///
/// Order-independent: any two filters whose populated subsets agree produce
/// equal keys. The empty key identifies the metric's unfiltered global
/// total. Keys are only ever used as index entries and snapshot labels —
/// they are never mutated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CombinationKey {
    // sorted by dimension name; Arc<str> shares the backing storage with the
    // filter the key was expanded from
    pairs: Box<[Dim]>,
}

impl CombinationKey {
    /// The empty key: the unfiltered global total.
    pub fn empty() -> Self {
        Self { pairs: Box::new([]) }
    }

    /// Build a key directly from (dimension, value) pairs.
    ///
    /// Intended for reporting-side code that needs to name a key without
    /// going through filter expansion. Pairs are sorted and deduplicated by
    /// dimension name (last value wins); empty values are dropped, matching
    /// [`Filter::set`].
    pub fn from_pairs<D: AsRef<str>, V: AsRef<str>>(
        pairs: impl IntoIterator<Item = (D, V)>,
    ) -> Self {
        let filter: Filter = pairs.into_iter().collect();
        Self {
            pairs: filter.dims.into_iter().collect(),
        }
    }

    /// True for the empty (global total) key.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Number of dimensions in this key.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// The key's dimensions, sorted by name.
    pub fn dimensions(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(d, v)| (&**d, &**v))
    }
}

impl fmt::Display for CombinationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.pairs.is_empty() {
            return f.write_str("*");
        }
        for (i, (dimension, value)) in self.pairs.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dimension}={value}")?;
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for CombinationKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(self.pairs.len()))?;
        for (dimension, value) in self.pairs.iter() {
            map.serialize_entry(&**dimension, &**value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_expands_to_the_global_key() {
        let keys = Filter::new().combinations().unwrap();
        assert_eq!(keys.len(), 1);
        assert!(keys[0].is_empty());
        assert_eq!(keys[0], CombinationKey::empty());
    }

    #[test]
    fn expansion_is_the_full_powerset() {
        let filter = Filter::new()
            .with("State", "CA")
            .with("StoreID", "3234")
            .with("Server", "Server1");
        let keys = filter.combinations().unwrap();
        assert_eq!(keys.len(), 8);

        // every subset appears exactly once
        let mut unique: Vec<_> = keys.to_vec();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 8);

        assert!(keys.contains(&CombinationKey::empty()));
        assert!(keys.contains(&CombinationKey::from_pairs([("State", "CA")])));
        assert!(keys.contains(&CombinationKey::from_pairs([
            ("State", "CA"),
            ("StoreID", "3234"),
            ("Server", "Server1"),
        ])));
    }

    #[test]
    fn expansion_is_order_independent() {
        let a = Filter::new().with("State", "CA").with("StoreID", "3234");
        let b = Filter::new().with("StoreID", "3234").with("State", "CA");
        assert_eq!(a, b);
        assert_eq!(a.combinations().unwrap(), b.combinations().unwrap());
    }

    #[test]
    fn expansion_is_deterministic_across_calls() {
        let filter = Filter::new().with("A", "1").with("B", "2");
        assert_eq!(filter.combinations().unwrap(), filter.combinations().unwrap());
    }

    #[test]
    fn empty_values_are_unpopulated() {
        let filter = Filter::new().with("State", "CA").with("Gender", "");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.combinations().unwrap().len(), 2);
    }

    #[test]
    fn duplicate_dimension_keeps_the_last_value() {
        let filter = Filter::new().with("State", "CA").with("State", "MN");
        assert_eq!(filter.len(), 1);
        assert_eq!(filter.dimensions().next(), Some(("State", "MN")));
    }

    #[test]
    fn rejects_empty_dimension_names() {
        let filter = Filter::new().with("", "CA");
        assert!(matches!(
            filter.combinations(),
            Err(TrackError::InvalidDimension(_))
        ));
    }

    #[test]
    fn rejects_oversized_filters() {
        let mut filter = Filter::new();
        for i in 0..=MAX_FILTER_DIMENSIONS {
            filter.set(format!("dim{i}"), "v");
        }
        assert!(matches!(
            filter.combinations(),
            Err(TrackError::TooManyDimensions { .. })
        ));
    }

    #[test]
    fn key_display_is_canonical() {
        assert_eq!(CombinationKey::empty().to_string(), "*");
        let key = CombinationKey::from_pairs([("StoreID", "3234"), ("State", "CA")]);
        assert_eq!(key.to_string(), "State=CA,StoreID=3234");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn key_serializes_as_a_map() {
        let key = CombinationKey::from_pairs([("State", "CA")]);
        assert_eq!(
            serde_json::to_value(&key).unwrap(),
            serde_json::json!({"State": "CA"})
        );
    }
}
