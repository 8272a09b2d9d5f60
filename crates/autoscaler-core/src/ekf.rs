//! Generic Extended Kalman Filter primitive. Pure algebra; the only state
//! carried between calls is `x` and `p`. State-transition and observation
//! functions are supplied as closures, since the observation closure used
//! by the tuner wraps a queue solver with no convenient symbolic Jacobian
//! -- both Jacobians are taken numerically by centred finite differences
//! here.

use autoscaler_common::{Result, RunnerError};
use nalgebra::{SMatrix, SVector};

const REL_STEP: f64 = 1e-4;
const STEP_FLOOR: f64 = 1e-6;

pub type StateFn<const N: usize> = Box<dyn Fn(&SVector<f64, N>) -> SVector<f64, N> + Send + Sync>;
pub type ObsFn<const N: usize, const M: usize> = Box<dyn Fn(&SVector<f64, N>) -> SVector<f64, M> + Send + Sync>;

pub struct ExtendedKalmanFilter<const N: usize, const M: usize> {
    x: SVector<f64, N>,
    p: SMatrix<f64, N, N>,
    f: StateFn<N>,
    h: ObsFn<N, M>,
    x_min: Option<SVector<f64, N>>,
    x_max: Option<SVector<f64, N>>,
    last_y: SVector<f64, M>,
    last_s: SMatrix<f64, M, M>,
}

impl<const N: usize, const M: usize> ExtendedKalmanFilter<N, M> {
    pub fn new(
        x0: SVector<f64, N>,
        p0: SMatrix<f64, N, N>,
        f: StateFn<N>,
        h: ObsFn<N, M>,
        bounds: Option<(SVector<f64, N>, SVector<f64, N>)>,
    ) -> Self {
        let (x_min, x_max) = match bounds {
            Some((lo, hi)) => (Some(lo), Some(hi)),
            None => (None, None),
        };
        Self { x: x0, p: p0, f, h, x_min, x_max, last_y: SVector::zeros(), last_s: SMatrix::zeros() }
    }

    pub fn x(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn p(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    pub fn last_innovation(&self) -> &SVector<f64, M> {
        &self.last_y
    }

    pub fn last_innovation_covariance(&self) -> &SMatrix<f64, M, M> {
        &self.last_s
    }

    pub fn set_state(&mut self, x: SVector<f64, N>, p: SMatrix<f64, N, N>) {
        self.x = x;
        self.p = p;
    }

    fn clamp(&mut self) {
        if let (Some(lo), Some(hi)) = (&self.x_min, &self.x_max) {
            for i in 0..N {
                self.x[i] = self.x[i].clamp(lo[i], hi[i]);
            }
        }
    }

    /// X ← f(X); P ← F P Fᵀ + Q, F the numerical Jacobian of f.
    pub fn predict(&mut self, q: &SMatrix<f64, N, N>) {
        let jac_f = numerical_jacobian::<N, N>(&self.x, self.f.as_ref());
        self.x = (self.f)(&self.x);
        self.p = jac_f * self.p * jac_f.transpose() + q;
        self.clamp();
    }

    /// y = Z − h(X); H numerical; S = H P Hᵀ + R; K = P Hᵀ S⁻¹;
    /// X ← X + K y; P ← (I − K H) P, symmetrised.
    pub fn update(&mut self, z: &SVector<f64, M>, r: &SMatrix<f64, M, M>) -> Result<()> {
        let pred = (self.h)(&self.x);
        let y = z - pred;
        let jac_h = numerical_jacobian::<N, M>(&self.x, self.h.as_ref());
        let s = jac_h * self.p * jac_h.transpose() + r;
        let s_inv = s.try_inverse().ok_or_else(|| RunnerError::Internal("innovation covariance is singular".into()))?;
        let k = self.p * jac_h.transpose() * s_inv;
        self.x += k * y;
        let identity = SMatrix::<f64, N, N>::identity();
        let p_new = (identity - k * jac_h) * self.p;
        self.p = (p_new + p_new.transpose()) * 0.5;
        self.last_y = y;
        self.last_s = s;
        self.clamp();
        Ok(())
    }

    /// Normalised Innovation Squared for the last update: yᵀ S⁻¹ y.
    pub fn nis(&self) -> Option<f64> {
        let s_inv = self.last_s.try_inverse()?;
        Some((self.last_y.transpose() * s_inv * self.last_y)[(0, 0)])
    }
}

fn numerical_jacobian<const N: usize, const OUT: usize>(
    x: &SVector<f64, N>,
    g: &(dyn Fn(&SVector<f64, N>) -> SVector<f64, OUT> + Send + Sync),
) -> SMatrix<f64, OUT, N> {
    let mut jac = SMatrix::<f64, OUT, N>::zeros();
    for j in 0..N {
        let step = (x[j].abs() * REL_STEP).max(STEP_FLOOR);
        let mut xp = *x;
        xp[j] += step;
        let mut xm = *x;
        xm[j] -= step;
        let fp = g(&xp);
        let fm = g(&xm);
        let d = (fp - fm) / (2.0 * step);
        for i in 0..OUT {
            jac[(i, j)] = d[i];
        }
    }
    jac
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_f() -> StateFn<2> {
        Box::new(|x: &SVector<f64, 2>| *x)
    }

    fn linear_h() -> ObsFn<2, 2> {
        // h(x) = [2x0, 3x1] -- Jacobian should recover diag(2,3).
        Box::new(|x: &SVector<f64, 2>| SVector::<f64, 2>::new(2.0 * x[0], 3.0 * x[1]))
    }

    #[test]
    fn predict_applies_process_noise_and_keeps_state_when_f_is_identity() {
        let x0 = SVector::<f64, 2>::new(1.0, 2.0);
        let p0 = SMatrix::<f64, 2, 2>::identity();
        let mut ekf = ExtendedKalmanFilter::new(x0, p0, identity_f(), linear_h(), None);
        let q = SMatrix::<f64, 2, 2>::identity() * 0.1;
        ekf.predict(&q);
        assert_eq!(*ekf.x(), x0);
        assert!((ekf.p()[(0, 0)] - 1.1).abs() < 1e-6);
    }

    #[test]
    fn update_moves_state_toward_observation() {
        let x0 = SVector::<f64, 2>::new(1.0, 1.0);
        let p0 = SMatrix::<f64, 2, 2>::identity();
        let mut ekf = ExtendedKalmanFilter::new(x0, p0, identity_f(), linear_h(), None);
        let r = SMatrix::<f64, 2, 2>::identity() * 0.01;
        // True state (2,2) -> observation (4,6). Start predicts (2,3).
        let z = SVector::<f64, 2>::new(4.0, 6.0);
        ekf.update(&z, &r).unwrap();
        assert!(ekf.x()[0] > 1.0 && ekf.x()[0] < 2.0);
        assert!(ekf.x()[1] > 1.0 && ekf.x()[1] < 2.0);
    }

    #[test]
    fn clamping_respects_bounds() {
        let x0 = SVector::<f64, 2>::new(1.0, 1.0);
        let p0 = SMatrix::<f64, 2, 2>::identity() * 1000.0;
        let lo = SVector::<f64, 2>::new(0.0, 0.0);
        let hi = SVector::<f64, 2>::new(1.5, 1.5);
        let mut ekf = ExtendedKalmanFilter::new(x0, p0, identity_f(), linear_h(), Some((lo, hi)));
        let r = SMatrix::<f64, 2, 2>::identity() * 0.0001;
        let z = SVector::<f64, 2>::new(100.0, 100.0);
        ekf.update(&z, &r).unwrap();
        assert!(ekf.x()[0] <= 1.5 && ekf.x()[1] <= 1.5);
    }

    #[test]
    fn nis_is_finite_and_non_negative_after_update() {
        let x0 = SVector::<f64, 2>::new(1.0, 1.0);
        let p0 = SMatrix::<f64, 2, 2>::identity();
        let mut ekf = ExtendedKalmanFilter::new(x0, p0, identity_f(), linear_h(), None);
        let r = SMatrix::<f64, 2, 2>::identity() * 0.1;
        ekf.update(&SVector::<f64, 2>::new(2.1, 3.2), &r).unwrap();
        let nis = ekf.nis().unwrap();
        assert!(nis.is_finite());
        assert!(nis >= 0.0);
    }
}
