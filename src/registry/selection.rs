//! Weighted endpoint selection.
//!
//! Highest weight wins; equal weights go to the endpoint configured first.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::registry::managed::ManagedEndpoint;

/// Something that can be ranked for selection.
pub trait Weighted {
    fn weight(&self) -> f32;
    fn ordinal(&self) -> usize;
}

impl Weighted for ManagedEndpoint {
    fn weight(&self) -> f32 {
        ManagedEndpoint::weight(self)
    }

    fn ordinal(&self) -> usize {
        ManagedEndpoint::ordinal(self)
    }
}

/// `Greater` when `a` is preferred over `b`.
pub fn compare_priority<T: Weighted>(a: &T, b: &T) -> Ordering {
    a.weight()
        .total_cmp(&b.weight())
        .then_with(|| b.ordinal().cmp(&a.ordinal()))
}

/// Most preferred candidate that is not `excluding` and passes `eligible`.
pub fn select_best<'a, T, I, P>(
    candidates: I,
    excluding: Option<&Arc<T>>,
    eligible: P,
) -> Option<Arc<T>>
where
    T: Weighted + 'a,
    I: IntoIterator<Item = &'a Arc<T>>,
    P: Fn(&T) -> bool,
{
    candidates
        .into_iter()
        .filter(|c| excluding.map_or(true, |ex| !Arc::ptr_eq(c, ex)))
        .filter(|c| eligible(c))
        .max_by(|a, b| compare_priority(a.as_ref(), b.as_ref()))
        .cloned()
}

/// Sort most preferred first.
pub fn sort_by_priority<T: Weighted>(candidates: &mut [Arc<T>]) {
    candidates.sort_by(|a, b| compare_priority(b.as_ref(), a.as_ref()));
}
