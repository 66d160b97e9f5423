//! Facet combinatorics for the double-description method.
//!
//! Every polytope vertex (an extreme ray of a cone in R⁶) carries the sorted set
//! of facets it is tight on. Adjacency between rays, and the facet sets of rays
//! created by a split, are decided on these sets alone, so the incremental
//! algorithm never re-derives incidences numerically.
//!
//! References
//! - Fukuda & Prodon, "Double description method revisited" (combinatorial
//!   adjacency test).

use std::fmt;

use smallvec::SmallVec;

/// Index of a facet in the per-query arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FacetId(pub u32);

impl fmt::Display for FacetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", self.0)
    }
}

/// Sorted, duplicate-free set of facet ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FacetSet(SmallVec<[FacetId; 8]>);

impl FacetSet {
    pub fn new() -> Self {
        Self(SmallVec::new())
    }

    pub fn from_unsorted<I: IntoIterator<Item = FacetId>>(ids: I) -> Self {
        let mut v: SmallVec<[FacetId; 8]> = ids.into_iter().collect();
        v.sort_unstable();
        v.dedup();
        Self(v)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = FacetId> + '_ {
        self.0.iter().copied()
    }

    pub fn as_slice(&self) -> &[FacetId] {
        &self.0
    }

    #[inline]
    pub fn has_facet(&self, f: FacetId) -> bool {
        self.0.binary_search(&f).is_ok()
    }

    pub fn insert(&mut self, f: FacetId) {
        if let Err(pos) = self.0.binary_search(&f) {
            self.0.insert(pos, f);
        }
    }

    /// Sorted merge of the common ids.
    pub fn intersection(&self, other: &Self) -> Self {
        let (a, b) = (&self.0, &other.0);
        let mut out = SmallVec::new();
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            match a[i].cmp(&b[j]) {
                std::cmp::Ordering::Less => i += 1,
                std::cmp::Ordering::Greater => j += 1,
                std::cmp::Ordering::Equal => {
                    out.push(a[i]);
                    i += 1;
                    j += 1;
                }
            }
        }
        Self(out)
    }

    /// Whether every id of `self` is in `other`.
    pub fn is_subset(&self, other: &Self) -> bool {
        if self.len() > other.len() {
            return false;
        }
        let mut j = 0;
        for &f in &self.0 {
            while j < other.0.len() && other.0[j] < f {
                j += 1;
            }
            if j == other.0.len() || other.0[j] != f {
                return false;
            }
            j += 1;
        }
        true
    }
}

impl FromIterator<FacetId> for FacetSet {
    fn from_iter<I: IntoIterator<Item = FacetId>>(iter: I) -> Self {
        Self::from_unsorted(iter)
    }
}

/// Cheap pre-test: do `a` and `b` share at least `n` facets? Exits early.
pub fn have_at_least_n_common(a: &FacetSet, b: &FacetSet, n: usize) -> bool {
    if a.len() < n || b.len() < n {
        return false;
    }
    if n == 0 {
        return true;
    }
    let (x, y) = (a.as_slice(), b.as_slice());
    let (mut i, mut j, mut count) = (0, 0, 0);
    while i < x.len() && j < y.len() {
        // not enough left on either side to reach n
        if count + (x.len() - i).min(y.len() - j) < n {
            return false;
        }
        match x[i].cmp(&y[j]) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                count += 1;
                if count >= n {
                    return true;
                }
                i += 1;
                j += 1;
            }
        }
    }
    false
}

/// Facet set of the ray created on edge `(a, b)` by splitting facet `new`.
pub fn init_facets(a: &FacetSet, b: &FacetSet, new: FacetId) -> FacetSet {
    let mut out = a.intersection(b);
    out.insert(new);
    out
}

/// Combinatorial adjacency test for extreme rays `i` and `j`.
///
/// `min_common` is `dim − 2` for a cone of dimension `dim`. Valid for any
/// H-representation (redundant facets included) as long as `sets` lists the
/// incidences of all extreme rays and nothing else.
pub fn adjacent(sets: &[FacetSet], i: usize, j: usize, min_common: usize) -> bool {
    if !have_at_least_n_common(&sets[i], &sets[j], min_common) {
        return false;
    }
    let common = sets[i].intersection(&sets[j]);
    !sets
        .iter()
        .enumerate()
        .any(|(k, s)| k != i && k != j && common.is_subset(s))
}

/// All adjacent pairs `(i, j)` with `i < j`.
pub fn edges(sets: &[FacetSet], min_common: usize) -> Vec<(usize, usize)> {
    let mut out = Vec::new();
    for i in 0..sets.len() {
        for j in (i + 1)..sets.len() {
            if adjacent(sets, i, j, min_common) {
                out.push((i, j));
            }
        }
    }
    out
}

/// k-combinations of items (lexicographic).
pub(crate) fn combinations<T: Copy>(items: &[T], k: usize) -> Vec<Vec<T>> {
    let n = items.len();
    if k > n || k == 0 {
        return Vec::new();
    }
    let mut idxs: Vec<usize> = (0..k).collect();
    let mut out = Vec::new();
    loop {
        out.push(idxs.iter().map(|&i| items[i]).collect());
        // rightmost index that can still advance
        let Some(i) = (0..k).rev().find(|&i| idxs[i] != i + n - k) else {
            break;
        };
        idxs[i] += 1;
        for j in i + 1..k {
            idxs[j] = idxs[j - 1] + 1;
        }
    }
    out
}
