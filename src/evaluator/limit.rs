//! Daily call budget around a real evaluator provider.
//!
//! Only successful real calls count. A slot is reserved before each call so
//! concurrent sessions cannot overshoot the limit together. The counter is
//! persisted next to the other evaluator state so restarts do not reset the
//! budget mid-day.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{AnswerEvaluator, EvalFuture, Evaluation, EvaluationRequest, EvaluatorError};

/// Counter state is guarded by a `Mutex` to keep it simple and safe.
pub struct DailyLimited<P: AnswerEvaluator> {
    inner: P,
    state_dir: PathBuf,
    daily_limit: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: AnswerEvaluator> DailyLimited<P> {
    pub fn new(inner: P, state_dir: PathBuf, daily_limit: u32) -> Self {
        if let Err(e) = fs::create_dir_all(&state_dir) {
            tracing::warn!(dir = %state_dir.display(), error = %e, "cannot create evaluator state dir");
        }
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&state_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            state_dir,
            daily_limit,
            counter,
        }
    }

    /// Calls already spent today.
    pub fn used_today(&self) -> u32 {
        let mut g = lock(&self.counter);
        if g.is_expired() {
            g.reset_to_today();
        }
        g.count
    }

    fn reserve(&self) -> Result<Reservation<'_>, EvaluatorError> {
        let mut g = lock(&self.counter);
        if g.is_expired() {
            g.reset_to_today();
            let _ = save_daily_counter(&self.state_dir, &g);
        }
        if g.count.saturating_add(g.in_flight) >= self.daily_limit {
            tracing::warn!(limit = self.daily_limit, "evaluator daily budget exhausted");
            return Err(EvaluatorError::BudgetExhausted(self.daily_limit));
        }
        g.in_flight += 1;
        Ok(Reservation {
            counter: &self.counter,
        })
    }

    async fn evaluate_impl(&self, req: EvaluationRequest<'_>) -> Result<Evaluation, EvaluatorError> {
        let slot = self.reserve()?;
        let out = self.inner.evaluate(req).await?;

        {
            let mut g = lock(&self.counter);
            g.count = g.count.saturating_add(1);
            if let Err(e) = save_daily_counter(&self.state_dir, &g) {
                tracing::warn!(error = %e, "failed to persist evaluator counter");
            }
        }
        drop(slot);
        Ok(out)
    }
}

/// A budget slot held while a call is in flight; dropping it frees the slot,
/// also when the call fails or is cancelled.
struct Reservation<'a> {
    counter: &'a Mutex<DailyCounter>,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        let mut g = lock(self.counter);
        g.in_flight = g.in_flight.saturating_sub(1);
    }
}

fn lock(counter: &Mutex<DailyCounter>) -> std::sync::MutexGuard<'_, DailyCounter> {
    counter.lock().unwrap_or_else(|p| p.into_inner())
}

impl<P: AnswerEvaluator> AnswerEvaluator for DailyLimited<P> {
    fn evaluate<'a>(&'a self, request: EvaluationRequest<'a>) -> EvalFuture<'a> {
        Box::pin(self.evaluate_impl(request))
    }

    fn provider_name(&self) -> &'static str {
        self.inner.provider_name()
    }
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
    /// Calls reserved but not finished; never persisted.
    #[serde(skip)]
    in_flight: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
            in_flight: 0,
        }
    }
}

impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }

    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    let s = serde_json::to_string(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut f = fs::File::create(&tmp)?;
    f.write_all(s.as_bytes())?;
    fs::rename(tmp, p)?;
    Ok(())
}
