//! Open-loop dispatch: one request per tick, no matter how many are still in
//! flight. A slow target piles up concurrent requests instead of slowing the
//! schedule down, so the offered load stays fixed for the whole run.

use crate::error::AttackError;
use crate::metrics::Metrics;
use crate::result::{is_success_code, AttackResult};
use crate::target::{StaticTargeter, Target, Targeter};
use crate::transport::{HttpTransport, Transport};
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::{interval, sleep_until, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Default per-request timeout used by [`run_attack`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Rate-paced concurrent dispatcher.
pub struct Attacker {
    transport: Arc<dyn Transport>,
    max_in_flight: Option<u64>,
}

impl Attacker {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            max_in_flight: None,
        }
    }

    /// Warn when more than `limit` requests are in flight. Dispatch never
    /// waits on this limit.
    pub fn with_max_in_flight(mut self, limit: u64) -> Self {
        self.max_in_flight = Some(limit);
        self
    }

    /// Start an attack with its own cancellation token.
    pub fn start(
        &self,
        targeter: Arc<dyn Targeter>,
        rate: f64,
        duration: Duration,
    ) -> Result<(ResultStream, CancelHandle), AttackError> {
        self.start_with_token(targeter, rate, duration, CancellationToken::new())
    }

    /// Start an attack that stops issuing requests once `cancel` fires.
    ///
    /// `rate` is in requests per second. A zero `duration` runs until
    /// cancelled; otherwise `floor(rate * duration)` requests are issued.
    /// Must be called from within a tokio runtime.
    pub fn start_with_token(
        &self,
        targeter: Arc<dyn Targeter>,
        rate: f64,
        duration: Duration,
        cancel: CancellationToken,
    ) -> Result<(ResultStream, CancelHandle), AttackError> {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(AttackError::InvalidRate { rate });
        }

        // Rates so low that one period overflows a Duration are unusable
        let period = Duration::try_from_secs_f64(1.0 / rate)
            .map_err(|_| AttackError::InvalidRate { rate })?
            .max(Duration::from_nanos(1));
        let hits = if duration.is_zero() {
            None
        } else {
            Some(hit_budget(rate, duration))
        };

        info!(
            "Starting attack: rate={}/s duration={:?} hits={:?} transport={}",
            rate,
            duration,
            hits,
            self.transport.name()
        );

        let (result_tx, result_rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        let plan = DispatchPlan {
            transport: self.transport.clone(),
            targeter,
            period,
            hits,
            // A duration past the end of the clock has no deadline
            deadline: if duration.is_zero() {
                None
            } else {
                started.checked_add(duration)
            },
            max_in_flight: self.max_in_flight,
        };

        tokio::spawn(dispatch_loop(plan, cancel.clone(), result_tx));

        Ok((
            ResultStream {
                rx: result_rx,
                started,
            },
            CancelHandle { token: cancel },
        ))
    }
}

/// Number of requests released over `duration` at `rate`.
fn hit_budget(rate: f64, duration: Duration) -> u64 {
    // Absorb float noise such as 0.29 * 100 = 28.999999999999996
    (rate * duration.as_secs_f64() + 1e-9).floor() as u64
}

struct DispatchPlan {
    transport: Arc<dyn Transport>,
    targeter: Arc<dyn Targeter>,
    period: Duration,
    hits: Option<u64>,
    deadline: Option<Instant>,
    max_in_flight: Option<u64>,
}

async fn dispatch_loop(
    plan: DispatchPlan,
    cancel: CancellationToken,
    result_tx: mpsc::UnboundedSender<AttackResult>,
) {
    let mut ticker = interval(plan.period);
    // Overdue ticks fire immediately so the offered load is kept
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);

    let in_flight = Arc::new(AtomicU64::new(0));
    let mut over_limit = false;
    let mut issued = 0u64;

    loop {
        if plan.hits.is_some_and(|hits| issued >= hits) {
            debug!("Hit budget exhausted after {} requests", issued);
            break;
        }

        // Ticks win over the deadline and overdue ticks fire in a burst, so a
        // stalled runtime still releases the full hit budget, possibly after
        // the wall-clock duration has passed.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Attack cancelled after {} requests", issued);
                break;
            }
            _ = ticker.tick() => {}
            _ = deadline(plan.deadline) => {
                debug!("Attack duration elapsed after {} requests", issued);
                break;
            }
        }

        let current = in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(limit) = plan.max_in_flight {
            if current > limit && !over_limit {
                warn!(
                    "In-flight requests ({}) exceeded max_in_flight ({}); dispatch is not throttled",
                    current, limit
                );
                over_limit = true;
            } else if current <= limit {
                over_limit = false;
            }
        }

        let target = plan.targeter.next();
        let transport = plan.transport.clone();
        let in_flight = in_flight.clone();
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            let result = hit(transport.as_ref(), &target).await;
            in_flight.fetch_sub(1, Ordering::Relaxed);
            // The receiver may already be gone if the driver gave up on the run
            let _ = result_tx.send(result);
        });
        issued += 1;
    }

    info!(
        "Dispatch stopped: issued={} in_flight={}",
        issued,
        in_flight.load(Ordering::Relaxed)
    );
    // The stream closes when the last in-flight task drops its sender
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => sleep_until(at.into()).await,
        None => std::future::pending().await,
    }
}

/// Issue one request and turn whatever happens into a result.
async fn hit(transport: &dyn Transport, target: &Target) -> AttackResult {
    let timestamp = Utc::now();
    let start = Instant::now();
    let outcome = transport.send(target).await;
    let latency = start.elapsed();
    let bytes_out = target.body().len() as u64;

    match outcome {
        Ok(response) => {
            let error = if is_success_code(response.code) {
                String::new()
            } else {
                status_error(response.code)
            };
            AttackResult {
                timestamp,
                latency,
                bytes_out,
                bytes_in: response.bytes_in,
                code: response.code,
                error,
                headers: response.headers,
            }
        }
        Err(e) => AttackResult {
            timestamp,
            latency,
            bytes_out,
            bytes_in: 0,
            code: 0,
            error: e.to_string(),
            headers: Default::default(),
        },
    }
}

fn status_error(code: u16) -> String {
    match reqwest::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
    {
        Some(reason) => format!("{code} {reason}"),
        None => code.to_string(),
    }
}

/// Stops an attack from issuing further requests. Requests already in flight
/// still complete and are delivered on the stream.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    /// Safe to call any number of times, from any task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Results of a running attack in completion order. Ends once dispatch has
/// stopped and every issued request has reported.
pub struct ResultStream {
    rx: mpsc::UnboundedReceiver<AttackResult>,
    started: Instant,
}

impl ResultStream {
    pub async fn recv(&mut self) -> Option<AttackResult> {
        self.rx.recv().await
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    /// Drain to completion. Returns the results and the wait, i.e. the time
    /// from the first tick until the stream closed.
    pub async fn collect(mut self) -> (Vec<AttackResult>, Duration) {
        let mut results = Vec::new();
        while let Some(result) = self.rx.recv().await {
            results.push(result);
        }
        (results, self.started.elapsed())
    }

    /// Drain to completion and aggregate.
    pub async fn metrics(self) -> Metrics {
        let (results, wait) = self.collect().await;
        Metrics::new(&results, wait)
    }
}

/// Attack `url` with `GET` requests and return the metrics of every request
/// issued before the run ended or `cancel` fired.
pub async fn run_attack(
    url: &str,
    rate: f64,
    duration: Duration,
    cancel: CancellationToken,
) -> Result<Metrics, AttackError> {
    let targeter = Arc::new(StaticTargeter::new(Target::get(url)?));
    let transport = Arc::new(HttpTransport::new(DEFAULT_TIMEOUT)?);
    let (stream, _cancel) =
        Attacker::new(transport).start_with_token(targeter, rate, duration, cancel)?;
    Ok(stream.metrics().await)
}
