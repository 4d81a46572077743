use rand::Rng;
use std::f64::consts::PI;

/// Standard-normal draw via the Box-Muller transform.
///
/// z = sqrt(-2 ln u) * cos(2 pi v), u, v ~ U(0, 1)
///
/// Exact zeros are redrawn so ln(0) can never occur.
#[inline]
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u = nonzero_uniform(rng);
    let v = nonzero_uniform(rng);
    (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
}

#[inline]
fn nonzero_uniform<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    loop {
        let x: f64 = rng.gen();
        if x != 0.0 {
            return x;
        }
    }
}
