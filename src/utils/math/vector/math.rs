use num::Num;

/// dot積
/// d(a, b) = Σ(a_i * b_i)
#[inline]
pub fn dot<N>(vec: &[N], other: &[N]) -> f64
where
    N: Num + Copy + Into<f64>,
{
    vec.iter()
        .zip(other)
        .map(|(&a, &b)| {
            let (a, b): (f64, f64) = (a.into(), b.into());
            a * b
        })
        .sum()
}

#[inline]
pub fn norm<N>(vec: &[N]) -> f64
where
    N: Num + Copy + Into<f64>,
{
    dot(vec, vec).sqrt()
}

/// 二乗ユークリッド距離
/// d(a, b) = Σ((a_i - b_i)^2)
#[inline]
pub fn squared_euclidean_distance<N>(vec: &[N], other: &[N]) -> f64
where
    N: Num + Copy + Into<f64>,
{
    vec.iter()
        .zip(other)
        .map(|(&a, &b)| {
            let (a, b): (f64, f64) = (a.into(), b.into());
            let diff = a - b;
            diff * diff
        })
        .sum()
}
