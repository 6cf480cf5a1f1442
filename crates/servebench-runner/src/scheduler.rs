use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Exp};
use servebench_core::{RequestRate, RequestSpec, Result, ServeBenchError};
use std::time::Duration;
use tokio::time::Instant;

/// Seeded when a seed is given, from OS entropy otherwise.
pub(crate) fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Releases requests according to an open-loop arrival process.
///
/// With a finite rate, the gap before every release after the first is drawn
/// from `Exp(rate)`, so arrivals form a Poisson process regardless of how long
/// earlier requests take. With an infinite rate everything is released at once.
///
/// Release times are kept as offsets from the first release and awaited with
/// `sleep_until`, so timer rounding on one gap never carries into the next.
/// The wait yields to other in-flight requests inside a multi-task runtime and
/// only holds up the worker inside a worker's own single-threaded runtime.
pub struct ArrivalScheduler {
    pending: std::vec::IntoIter<RequestSpec>,
    interval: Option<Exp<f64>>,
    rng: StdRng,
    released: usize,
    origin: Option<Instant>,
    offset: Duration,
}

impl ArrivalScheduler {
    pub fn new(requests: Vec<RequestSpec>, rate: RequestRate, seed: Option<u64>) -> Result<Self> {
        let interval = match rate {
            RequestRate::Infinite => None,
            RequestRate::PerSecond(r) => Some(Exp::new(r).map_err(|e| {
                ServeBenchError::Config(format!("invalid request rate {}: {}", r, e))
            })?),
        };
        Ok(Self {
            pending: requests.into_iter(),
            interval,
            rng: seeded_rng(seed),
            released: 0,
            origin: None,
            offset: Duration::ZERO,
        })
    }

    /// Waits out the next inter-arrival gap, then hands over the next request.
    pub async fn next(&mut self) -> Option<RequestSpec> {
        let request = self.pending.next()?;
        match self.origin {
            None => self.origin = Some(Instant::now()),
            Some(origin) => {
                let gap = self.sample_interval();
                self.offset = self.offset.saturating_add(gap);
                match origin.checked_add(self.offset) {
                    Some(deadline) if deadline > Instant::now() => {
                        tokio::time::sleep_until(deadline).await
                    }
                    Some(_) => {}
                    None => tokio::time::sleep(self.offset).await,
                }
            }
        }
        self.released += 1;
        Some(request)
    }

    pub fn remaining(&self) -> usize {
        self.pending.len()
    }

    pub fn released(&self) -> usize {
        self.released
    }

    fn sample_interval(&mut self) -> Duration {
        match &self.interval {
            None => Duration::ZERO,
            Some(exp) => Duration::try_from_secs_f64(exp.sample(&mut self.rng))
                .unwrap_or(Duration::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> Vec<RequestSpec> {
        (0..n).map(|i| RequestSpec::new(format!("p{}", i), i + 1, 8)).collect()
    }

    async fn release_times(n: usize, rate: RequestRate, seed: u64) -> Vec<Duration> {
        let mut arrivals = ArrivalScheduler::new(pool(n), rate, Some(seed)).unwrap();
        let start = Instant::now();
        let mut times = Vec::new();
        while arrivals.next().await.is_some() {
            times.push(start.elapsed());
        }
        times
    }

    #[tokio::test(start_paused = true)]
    async fn test_releases_every_request_in_order() {
        let mut arrivals =
            ArrivalScheduler::new(pool(20), RequestRate::PerSecond(50.0), Some(7)).unwrap();
        assert_eq!(arrivals.remaining(), 20);

        let mut seen = Vec::new();
        while let Some(req) = arrivals.next().await {
            seen.push(req.prompt_len);
        }
        assert_eq!(seen, (1..=20).collect::<Vec<_>>());
        assert_eq!(arrivals.released(), 20);
        assert_eq!(arrivals.remaining(), 0);
        assert!(arrivals.next().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_infinite_rate_is_a_burst() {
        let times = release_times(32, RequestRate::Infinite, 1).await;
        assert_eq!(times.len(), 32);
        assert!(times.iter().all(|t| t.is_zero()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_release_is_immediate() {
        let times = release_times(3, RequestRate::PerSecond(0.5), 3).await;
        assert!(times[0].is_zero());
        assert!(times[1] > times[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mean_span_matches_poisson_rate() {
        let n = 50;
        let rate = 10.0;
        let trials = 200;

        let mut total = 0.0;
        for seed in 0..trials {
            let times = release_times(n, RequestRate::PerSecond(rate), seed).await;
            assert_eq!(times.len(), n);
            total += times[n - 1].as_secs_f64();
        }
        let mean_span = total / trials as f64;
        let expected = (n - 1) as f64 / rate;

        assert!(
            (mean_span - expected).abs() / expected < 0.05,
            "mean span {} too far from {}",
            mean_span,
            expected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_seed_same_schedule() {
        let a = release_times(10, RequestRate::PerSecond(4.0), 42).await;
        let b = release_times(10, RequestRate::PerSecond(4.0), 42).await;
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn test_high_rate_span_does_not_drift() {
        let n = 1000;
        let rate = 10_000.0;
        let trials = 20;

        let mut total = 0.0;
        for seed in 0..trials {
            let times = release_times(n, RequestRate::PerSecond(rate), seed).await;
            total += times[n - 1].as_secs_f64();
        }
        let mean_span = total / trials as f64;
        let expected = (n - 1) as f64 / rate;

        assert!(
            (mean_span - expected).abs() / expected < 0.05,
            "mean span {} too far from {}",
            mean_span,
            expected
        );
    }

    #[test]
    fn test_tiny_rate_gap_saturates() {
        let mut arrivals =
            ArrivalScheduler::new(pool(2), RequestRate::PerSecond(1e-25), Some(5)).unwrap();
        assert_eq!(arrivals.sample_interval(), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_waits_instead_of_panicking() {
        let mut arrivals =
            ArrivalScheduler::new(pool(2), RequestRate::PerSecond(1e-25), Some(5)).unwrap();
        assert!(arrivals.next().await.is_some());

        let second = tokio::time::timeout(Duration::from_secs(3600), arrivals.next()).await;
        assert!(second.is_err());
        assert_eq!(arrivals.released(), 1);
    }
}
