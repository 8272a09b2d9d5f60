//! M/M/1/K queue with a state-dependent service rate.
//!
//! States `0..=k` track the number of requests in the system. The first
//! `mu.len()` states have their own service rate (e.g. batch occupancy
//! 1..MaxBatch in the decode queue); states beyond `mu.len()` saturate at
//! `mu[mu.len() - 1]` -- the server is full and extra requests wait.

const RENORMALIZE_EVERY: usize = 50;
const OVERFLOW_GUARD: f64 = 1e200;

#[derive(Debug, Clone)]
pub struct QueueModel {
    mu: Vec<f64>,
    k: usize,
    rho_max: f64,
    lambda: f64,
    p: Vec<f64>,
    valid: bool,
}

impl QueueModel {
    /// `mu` holds the state-dependent service rates for occupancy
    /// `1..=mu.len()`; `k` is the total queue capacity. Panics if `mu` is
    /// empty or longer than `k`.
    pub fn new(mu: Vec<f64>, k: usize) -> Self {
        assert!(!mu.is_empty(), "service rate vector must not be empty");
        assert!(mu.len() <= k, "service rate vector longer than capacity");
        Self { mu, k, rho_max: k as f64, lambda: 0.0, p: vec![0.0; k + 1], valid: false }
    }

    /// The ordinary M/M/1/K with a constant service rate: a one-element
    /// `mu` vector, used by utilities and tests.
    pub fn constant(mu: f64, k: usize) -> Self {
        Self::new(vec![mu], k)
    }

    fn rate_at(&self, n: usize) -> f64 {
        debug_assert!(n >= 1);
        let idx = n.min(self.mu.len()) - 1;
        self.mu[idx]
    }

    /// Occupancy above which the server no longer gains throughput from
    /// additional arrivals (the batch is full).
    fn server_capacity(&self) -> usize {
        self.mu.len()
    }

    pub fn solve(&mut self, lambda: f64) -> &mut Self {
        self.lambda = lambda;
        self.valid = self.check_validity(lambda);
        if !self.valid {
            self.p.iter_mut().for_each(|p| *p = 0.0);
            return self;
        }

        let mut unnorm = vec![0.0_f64; self.k + 1];
        unnorm[0] = 1.0;
        for n in 1..=self.k {
            unnorm[n] = unnorm[n - 1] * lambda / self.rate_at(n);
            if (n % RENORMALIZE_EVERY == 0) && unnorm[n].abs() > OVERFLOW_GUARD {
                let scale = unnorm[n];
                for v in unnorm[..=n].iter_mut() {
                    *v /= scale;
                }
            }
        }
        let sum: f64 = unnorm.iter().sum();
        if sum <= 0.0 || !sum.is_finite() {
            self.valid = false;
            self.p.iter_mut().for_each(|p| *p = 0.0);
            return self;
        }
        for (p, u) in self.p.iter_mut().zip(unnorm.iter()) {
            *p = u / sum;
        }
        self
    }

    fn check_validity(&self, lambda: f64) -> bool {
        if !lambda.is_finite() || lambda < 0.0 {
            return false;
        }
        if self.mu.iter().any(|&m| !(m > 0.0) || !m.is_finite()) {
            return false;
        }
        let rho1 = lambda / self.mu[0];
        rho1 <= self.rho_max
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn probabilities(&self) -> &[f64] {
        &self.p
    }

    /// ρ = 1 − p[0].
    pub fn utilization(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        1.0 - self.p[0]
    }

    /// Effective throughput X = λ(1 − p[K]).
    pub fn throughput(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        self.lambda * (1.0 - self.p[self.k])
    }

    /// Average number of requests in the system, L.
    pub fn avg_number_in_system(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        self.p.iter().enumerate().map(|(n, &p)| n as f64 * p).sum()
    }

    /// Average number of requests actively held by the server (occupancy
    /// capped at the server's own capacity; the rest are waiting).
    pub fn avg_number_in_servers(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        let cap = self.server_capacity();
        self.p.iter().enumerate().map(|(n, &p)| n.min(cap) as f64 * p).sum()
    }

    /// Average number of requests waiting (not yet admitted to the server).
    pub fn avg_number_waiting(&self) -> f64 {
        (self.avg_number_in_system() - self.avg_number_in_servers()).max(0.0)
    }

    /// W_q = L_q / X (Little's law).
    pub fn avg_waiting_time(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        let x = self.throughput();
        if x <= 0.0 {
            return 0.0;
        }
        self.avg_number_waiting() / x
    }

    /// S = (number in servers) / X.
    pub fn avg_service_time(&self) -> f64 {
        if !self.valid {
            return 0.0;
        }
        let x = self.throughput();
        if x <= 0.0 {
            return 0.0;
        }
        self.avg_number_in_servers() / x
    }

    /// W = W_q + S.
    pub fn avg_response_time(&self) -> f64 {
        self.avg_waiting_time() + self.avg_service_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_sum_to_one() {
        let mut q = QueueModel::constant(5.0, 10);
        q.solve(3.0);
        assert!(q.is_valid());
        let sum: f64 = q.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6, "sum was {sum}");
    }

    #[test]
    fn littles_law_holds() {
        let mut q = QueueModel::constant(5.0, 20);
        q.solve(4.0);
        let l = q.avg_number_in_system();
        let x = q.throughput();
        let w = q.avg_response_time();
        assert!((l - x * w).abs() < 1e-4, "L={l} X*W={}", x * w);
    }

    #[test]
    fn invalid_when_overloaded() {
        let mut q = QueueModel::constant(1.0, 4);
        q.solve(10.0); // lambda/mu = 10 > RhoMax=4
        assert!(!q.is_valid());
        assert_eq!(q.utilization(), 0.0);
        assert_eq!(q.avg_response_time(), 0.0);
    }

    #[test]
    fn invalid_when_negative_lambda() {
        let mut q = QueueModel::constant(1.0, 4);
        q.solve(-1.0);
        assert!(!q.is_valid());
    }

    #[test]
    fn invalid_when_service_rate_non_positive() {
        let mut q = QueueModel::new(vec![1.0, 0.0, 2.0], 5);
        q.solve(0.5);
        assert!(!q.is_valid());
    }

    #[test]
    fn state_dependent_rate_saturates_beyond_server_capacity() {
        // mu has 2 entries: batch occupancy 1 and 2 share these rates, but
        // K=6 allows waiting beyond the 2-slot server.
        let mut q = QueueModel::new(vec![4.0, 6.0], 6);
        q.solve(3.0);
        assert!(q.is_valid());
        assert!(q.avg_number_waiting() >= 0.0);
        assert!(q.avg_number_in_servers() <= 2.0);
    }

    #[test]
    fn zero_arrival_rate_is_valid_and_idle() {
        let mut q = QueueModel::constant(5.0, 8);
        q.solve(0.0);
        assert!(q.is_valid());
        assert_eq!(q.utilization(), 0.0);
        assert_eq!(q.throughput(), 0.0);
    }

    #[test]
    fn large_capacity_does_not_overflow() {
        let mut q = QueueModel::constant(2.0, 400);
        q.solve(1.9);
        assert!(q.is_valid());
        let sum: f64 = q.probabilities().iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(q.probabilities().iter().all(|p| p.is_finite()));
    }
}
