//! Scripted capability client
//!
//! Each target gets a [`Behavior`]; every call is logged with its start and
//! end instants so tests can check ordering and overlap.

use async_trait::async_trait;
use landeval::{CapabilityClient, CapabilityError, CapabilityResponse};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Default)]
pub struct Behavior {
    pub latency: Duration,
    /// Calls that fail with a rate-limit error before one succeeds
    pub transient_failures: u32,
    /// Every call fails with a non-transient error
    pub permanent_failure: bool,
    pub panics: bool,
}

impl Behavior {
    pub fn latency_ms(ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(ms),
            ..Self::default()
        }
    }

    pub fn permanent() -> Self {
        Self {
            permanent_failure: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panics: true,
            ..Self::default()
        }
    }

    pub fn transient(failures: u32) -> Self {
        Self {
            transient_failures: failures,
            ..Self::default()
        }
    }
}

/// One logged call.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub target: String,
    pub started: Instant,
    pub finished: Instant,
    pub succeeded: bool,
}

#[derive(Default)]
pub struct ScriptedClient {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
    log: Mutex<Vec<Invocation>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, target: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(target.to_string(), behavior);
        self
    }

    pub fn calls(&self, target: &str) -> u32 {
        self.calls.lock().unwrap().get(target).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> u32 {
        self.calls.lock().unwrap().values().sum()
    }

    pub fn log(&self) -> Vec<Invocation> {
        self.log.lock().unwrap().clone()
    }

    /// Highest number of calls that were executing at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Latest end of any call to one of `targets`.
    pub fn last_end(&self, targets: &[&str]) -> Option<Instant> {
        self.log()
            .iter()
            .filter(|i| targets.contains(&i.target.as_str()))
            .map(|i| i.finished)
            .max()
    }

    /// Earliest start of any call to `target`.
    pub fn first_start(&self, target: &str) -> Option<Instant> {
        self.log()
            .iter()
            .filter(|i| i.target == target)
            .map(|i| i.started)
            .min()
    }
}

#[async_trait]
impl CapabilityClient for ScriptedClient {
    async fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, target: &str, _input: &str) -> Result<CapabilityResponse, CapabilityError> {
        let behavior = self.behaviors.get(target).cloned().unwrap_or_default();
        let call = {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(target.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        if behavior.panics {
            panic!("scripted panic in {}", target);
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let started = Instant::now();
        if !behavior.latency.is_zero() {
            tokio::time::sleep(behavior.latency).await;
        }

        let result = if behavior.permanent_failure {
            Err(CapabilityError::InvocationFailed(format!("{} refused the input", target)))
        } else if call <= behavior.transient_failures {
            Err(CapabilityError::RateLimited(format!("{} call {}", target, call)))
        } else {
            Ok(CapabilityResponse::completed(format!(
                r#"{{"summary": "{} finding", "score": 7, "buildable": true}}"#,
                target
            )))
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(Invocation {
            target: target.to_string(),
            started,
            finished: Instant::now(),
            succeeded: result.is_ok(),
        });
        result
    }
}
