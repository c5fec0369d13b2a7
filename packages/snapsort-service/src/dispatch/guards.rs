//! Call accounting for the expensive visual-analysis path. None of these are global: the
//! dispatcher owns the breaker and the limiter, and every request gets its own budget.

use std::{
	collections::VecDeque,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
	time::Duration,
};

use tokio::time::Instant;

use crate::{Error, Result};
use snapsort_config::{DispatchBreaker, DispatchRateLimit};

const RATE_WINDOW: Duration = Duration::from_secs(60);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Per-request allowance of vision calls and cost.
#[derive(Debug)]
pub struct VisionBudget {
	max_calls: u32,
	max_cost: Option<f64>,
	cost_per_call: f64,
	state: Mutex<BudgetState>,
}

#[derive(Debug, Default)]
struct BudgetState {
	calls: u32,
	cost: f64,
}

impl VisionBudget {
	pub fn new(max_calls: u32, max_cost: Option<f64>, cost_per_call: f64) -> Self {
		Self { max_calls, max_cost, cost_per_call, state: Mutex::new(BudgetState::default()) }
	}

	/// True while at least one more call fits both the quota and the cost limit.
	pub fn can_afford_one(&self) -> bool {
		let state = lock(&self.state);

		self.fits(&state)
	}

	/// Charges one call up front. Fails without charging when the quota or the cost limit would be
	/// exceeded.
	pub fn try_reserve(&self) -> Result<()> {
		let mut state = lock(&self.state);

		if state.calls >= self.max_calls {
			return Err(Error::Exhausted {
				message: format!("vision call quota of {} reached", self.max_calls),
			});
		}
		if !self.fits(&state) {
			return Err(Error::Exhausted { message: "cost budget reached".to_string() });
		}

		state.calls += 1;
		state.cost += self.cost_per_call;

		Ok(())
	}

	/// Like [`VisionBudget::try_reserve`], but the charge is given back unless the returned
	/// reservation is committed.
	pub fn reserve(self: &Arc<Self>) -> Result<VisionReservation> {
		self.try_reserve()?;

		Ok(VisionReservation { budget: self.clone(), committed: false })
	}

	pub fn calls(&self) -> u32 {
		lock(&self.state).calls
	}

	pub fn cost(&self) -> f64 {
		lock(&self.state).cost
	}

	fn fits(&self, state: &BudgetState) -> bool {
		state.calls < self.max_calls
			&& self.max_cost.map(|max| state.cost + self.cost_per_call <= max + f64::EPSILON).unwrap_or(true)
	}

	fn release(&self) {
		let mut state = lock(&self.state);

		state.calls = state.calls.saturating_sub(1);
		state.cost = (state.cost - self.cost_per_call).max(0.0);
	}
}

/// One call held against a [`VisionBudget`]. Dropping it uncommitted refunds the call, so work
/// that is aborted before it reaches the provider is never billed.
#[derive(Debug)]
pub struct VisionReservation {
	budget: Arc<VisionBudget>,
	committed: bool,
}
impl VisionReservation {
	/// The call is being made. It stays charged whether it succeeds, fails or is aborted.
	pub fn commit(mut self) {
		self.committed = true;
	}
}
impl Drop for VisionReservation {
	fn drop(&mut self) {
		if !self.committed {
			self.budget.release();
		}
	}
}

/// Opens after `failure_threshold` consecutive failures and rejects calls until the cooldown has
/// passed. The first call after the cooldown is a probe: success closes the breaker, failure opens
/// it again.
#[derive(Debug)]
pub struct CircuitBreaker {
	failure_threshold: u32,
	cooldown: Duration,
	state: Mutex<BreakerState>,
}

#[derive(Debug, Default)]
struct BreakerState {
	consecutive_failures: u32,
	open_until: Option<Instant>,
}

impl CircuitBreaker {
	pub fn new(cfg: &DispatchBreaker) -> Self {
		Self {
			failure_threshold: cfg.failure_threshold.max(1),
			cooldown: Duration::from_millis(cfg.cooldown_ms),
			state: Mutex::new(BreakerState::default()),
		}
	}

	pub fn allow(&self) -> bool {
		let state = lock(&self.state);

		state.open_until.map(|until| Instant::now() >= until).unwrap_or(true)
	}

	pub fn is_open(&self) -> bool {
		!self.allow()
	}

	pub fn record_success(&self) {
		let mut state = lock(&self.state);

		state.consecutive_failures = 0;
		state.open_until = None;
	}

	pub fn record_failure(&self) {
		let mut state = lock(&self.state);

		state.consecutive_failures += 1;

		if state.consecutive_failures >= self.failure_threshold {
			state.open_until = Some(Instant::now() + self.cooldown);

			tracing::warn!(
				failures = state.consecutive_failures,
				cooldown_ms = self.cooldown.as_millis() as u64,
				"Vision circuit opened."
			);
		}
	}
}

/// Sliding one-minute window over vision calls across all requests.
#[derive(Debug)]
pub struct CallRateLimiter {
	max_per_minute: u32,
	calls: Mutex<VecDeque<Instant>>,
}
impl CallRateLimiter {
	pub fn new(cfg: &DispatchRateLimit) -> Self {
		Self { max_per_minute: cfg.max_vision_calls_per_minute, calls: Mutex::new(VecDeque::new()) }
	}

	pub fn try_acquire(&self) -> bool {
		if self.max_per_minute == 0 {
			return true;
		}

		let mut calls = lock(&self.calls);
		let now = Instant::now();

		while calls.front().map(|at| now.duration_since(*at) >= RATE_WINDOW).unwrap_or(false) {
			calls.pop_front();
		}

		if calls.len() >= self.max_per_minute as usize {
			return false;
		}

		calls.push_back(now);

		true
	}
}
