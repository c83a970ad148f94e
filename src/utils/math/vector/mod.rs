pub mod math;

use num::Num;
use serde::{Deserialize, Serialize};

/// SparseVector keeps only the non-zero elements of a vector.
/// `indices` are strictly ascending and `values[i]` belongs to `indices[i]`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SparseVector<N = f64>
where
    N: Num + Copy,
{
    indices: Vec<u32>,
    values: Vec<N>,
}

impl<N> SparseVector<N>
where
    N: Num + Copy,
{
    pub fn new() -> Self {
        Self {
            indices: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Build from `(index, value)` pairs in any order.
    /// Duplicate indices are summed and zeros are dropped.
    ///
    /// # Arguments
    /// * `pairs` - index/value pairs
    pub fn from_pairs(mut pairs: Vec<(u32, N)>) -> Self {
        pairs.sort_unstable_by_key(|(idx, _)| *idx);
        let mut out = Self::new();
        for (idx, val) in pairs {
            match out.indices.last() {
                Some(&last) if last == idx => {
                    if let Some(v) = out.values.last_mut() {
                        *v = *v + val;
                    }
                }
                _ => {
                    out.indices.push(idx);
                    out.values.push(val);
                }
            }
        }
        out.retain_non_zero();
        out
    }

    pub fn from_dense(dense: &[N]) -> Self {
        let mut out = Self::new();
        for (idx, &val) in dense.iter().enumerate() {
            if val != N::zero() {
                out.indices.push(idx as u32);
                out.values.push(val);
            }
        }
        out
    }

    fn retain_non_zero(&mut self) {
        let mut keep = 0;
        for i in 0..self.indices.len() {
            if self.values[i] != N::zero() {
                self.indices[keep] = self.indices[i];
                self.values[keep] = self.values[i];
                keep += 1;
            }
        }
        self.indices.truncate(keep);
        self.values.truncate(keep);
    }

    #[inline]
    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, N)> + '_ {
        self.indices.iter().zip(self.values.iter()).map(|(&i, &v)| (i as usize, v))
    }

    pub fn get(&self, index: usize) -> N {
        match self.indices.binary_search(&(index as u32)) {
            Ok(pos) => self.values[pos],
            Err(_) => N::zero(),
        }
    }
}

impl<N> SparseVector<N>
where
    N: Num + Copy + Into<f64>,
{
    pub fn norm(&self) -> f64 {
        self.values
            .iter()
            .map(|&v| {
                let v: f64 = v.into();
                v * v
            })
            .sum::<f64>()
            .sqrt()
    }

    /// Dot product against a dense vector.
    /// Indices beyond `dense.len()` contribute nothing.
    #[inline]
    pub fn dot_dense(&self, dense: &[f64]) -> f64 {
        self.iter()
            .filter_map(|(i, v)| {
                let v: f64 = v.into();
                dense.get(i).map(|d| v * d)
            })
            .sum()
    }

    /// `dense += self`
    #[inline]
    pub fn add_to_dense(&self, dense: &mut [f64]) {
        for (i, v) in self.iter() {
            if let Some(d) = dense.get_mut(i) {
                let v: f64 = v.into();
                *d += v;
            }
        }
    }

    /// Scale to unit L2 norm as `f64`. Zero vectors stay zero.
    pub fn normalized(&self) -> SparseVector<f64> {
        let norm = self.norm();
        let mut out = SparseVector::<f64>::new();
        if norm == 0.0 {
            return out;
        }
        out.indices = self.indices.clone();
        out.values = self
            .values
            .iter()
            .map(|&v| {
                let v: f64 = v.into();
                v / norm
            })
            .collect();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_pairs_sorts_merges_and_drops_zeros() {
        let v = SparseVector::from_pairs(vec![(5, 1.0), (1, 2.0), (5, 2.0), (3, 0.0)]);
        assert_eq!(v.indices(), &[1, 5]);
        assert_eq!(v.get(5), 3.0);
        assert_eq!(v.get(3), 0.0);
    }

    #[test]
    fn dense_roundtrip_and_dot() {
        let v = SparseVector::from_dense(&[0.0, 3.0, 0.0, 4.0]);
        assert_eq!(v.nnz(), 2);
        assert_eq!(v.norm(), 5.0);
        assert_eq!(v.dot_dense(&[1.0, 1.0, 1.0, 1.0]), 7.0);
        let n = v.normalized();
        assert!((n.norm() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn integer_values_work() {
        let v: SparseVector<u32> = SparseVector::from_pairs(vec![(0, 2), (2, 1)]);
        let mut dense = vec![0.0; 3];
        v.add_to_dense(&mut dense);
        assert_eq!(dense, vec![2.0, 0.0, 1.0]);
    }
}
