use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::descriptor::ProxyDescriptor;
use crate::engine_config::{BuildOptions, EngineConfig, build};
use crate::error::SkipReason;
use crate::output::RunSummary;
use crate::parser::parse;
use crate::reporter::ProbeReporter;
use crate::validator::{DEFAULT_TIMEOUT, ValidationOutcome, Validator, validate_within};

pub const DEFAULT_CONCURRENCY: usize = 5;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Maximum number of validations running at once.
    pub concurrency: usize,
    /// Deadline for a single validation.
    pub timeout: Duration,
    pub build: BuildOptions,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            timeout: DEFAULT_TIMEOUT,
            build: BuildOptions::default(),
        }
    }
}

/// A descriptor ready for the validator, together with its config.
struct ProbeUnit {
    descriptor: ProxyDescriptor,
    config: EngineConfig,
}

pub struct ProbeEngine {
    options: EngineOptions,
    validator: Arc<dyn Validator>,
    reporters: Vec<Arc<dyn ProbeReporter>>,
}

impl ProbeEngine {
    pub fn new(options: EngineOptions, validator: Arc<dyn Validator>) -> Self {
        Self {
            options,
            validator,
            reporters: Vec::new(),
        }
    }

    pub fn register_reporter(&mut self, reporter: Arc<dyn ProbeReporter>) -> &mut Self {
        self.reporters.push(reporter);
        self
    }

    /// Validate every line and wait for all admitted units to finish.
    ///
    /// Parsing and building happen here, as lines are admitted; only the
    /// validation itself occupies one of the `concurrency` slots. Once
    /// `shutdown` turns true nothing new is admitted and in-flight
    /// validations are dropped.
    pub async fn run<I>(&self, lines: I, shutdown: watch::Receiver<bool>) -> RunSummary
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let start_time = Instant::now();
        let total = AtomicUsize::new(0);
        let skipped = AtomicUsize::new(0);
        let admitting = shutdown.clone();

        let units = lines
            .into_iter()
            .take_while(|_| !*admitting.borrow())
            .filter_map(|line| {
                let line = line.as_ref();
                if line.trim().is_empty() {
                    return None;
                }
                total.fetch_add(1, Ordering::Relaxed);
                match self.prepare(line) {
                    Ok(unit) => Some(unit),
                    Err(reason) => {
                        skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("[SKIP] {:?}: {}", line, reason);
                        None
                    }
                }
            });

        let results: Vec<Option<ValidationOutcome>> = stream::iter(units)
            .map(|unit| self.execute(unit, shutdown.clone()))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        self.finish_reporters().await;

        let mut summary = RunSummary {
            total: total.into_inner(),
            skipped: skipped.into_inner(),
            ..Default::default()
        };
        for result in &results {
            match result {
                Some(outcome) => summary.record(outcome),
                None => summary.cancelled += 1,
            }
        }

        info!(
            "Probe completed in {:.2}s - {}/{} configs accepted",
            start_time.elapsed().as_secs_f64(),
            summary.succeeded,
            summary.validated()
        );

        summary
    }

    fn prepare(&self, line: &str) -> Result<ProbeUnit, SkipReason> {
        let descriptor = parse(line)?;
        let config = build(&descriptor, &self.options.build)?;
        Ok(ProbeUnit { descriptor, config })
    }

    /// `None` when the unit was cancelled.
    async fn execute(
        &self,
        unit: ProbeUnit,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<ValidationOutcome> {
        if *shutdown.borrow() {
            return None;
        }

        let start_time = Instant::now();
        let validation =
            validate_within(self.validator.as_ref(), &unit.config, self.options.timeout);
        let outcome = tokio::select! {
            outcome = validation => outcome,
            _ = cancelled(&mut shutdown) => {
                debug!("[CANCELLED] {}", unit.descriptor.raw);
                return None;
            }
        };
        let elapsed = start_time.elapsed().as_secs_f64();

        match &outcome {
            ValidationOutcome::Success => {
                info!("[VALID] {} ({:.2}s)", unit.descriptor.name(), elapsed)
            }
            ValidationOutcome::Failure(reason) => {
                warn!("[FAILED] {} ({:.2}s): {}", unit.descriptor.raw, elapsed, reason)
            }
            ValidationOutcome::Timeout => {
                debug!("[TIMEOUT] {} ({:.2}s)", unit.descriptor.raw, elapsed)
            }
        }

        self.notify_reporters(&unit.descriptor, &outcome).await;
        Some(outcome)
    }

    async fn notify_reporters(&self, descriptor: &ProxyDescriptor, outcome: &ValidationOutcome) {
        for reporter in &self.reporters {
            if let Err(e) = reporter.report(descriptor, outcome).await {
                error!("Reporter '{}' failed: {}", reporter.name(), e);
            }
        }
    }

    async fn finish_reporters(&self) {
        for reporter in &self.reporters {
            if let Err(e) = reporter.finish().await {
                error!("Reporter '{}' failed to finish: {}", reporter.name(), e);
            }
        }
    }
}

/// Resolves once shutdown is requested; never resolves if the sender is gone.
async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_config::OutboundSettings;
    use crate::reporter::ValidListReporter;
    use async_trait::async_trait;
    use std::collections::HashSet;

    /// Accepts trojan configs whose password starts with "ok", tracking how
    /// many validations run at once.
    #[derive(Default)]
    struct CountingValidator {
        delay: Duration,
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    impl CountingValidator {
        fn with_delay(delay: Duration) -> Self {
            Self {
                delay,
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Validator for CountingValidator {
        async fn validate(&self, config: &EngineConfig) -> ValidationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(self.delay).await;

            self.running.fetch_sub(1, Ordering::SeqCst);
            let accepted = match &config.outbounds[0].settings {
                OutboundSettings::Trojan { servers } => servers[0].password.starts_with("ok"),
                _ => true,
            };
            if accepted {
                ValidationOutcome::Success
            } else {
                ValidationOutcome::Failure("rejected by stub".into())
            }
        }
    }

    /// Never answers.
    #[derive(Default)]
    struct HangingValidator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Validator for HangingValidator {
        async fn validate(&self, _config: &EngineConfig) -> ValidationOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn engine_with_output(
        validator: Arc<dyn Validator>,
        concurrency: usize,
        timeout: Duration,
    ) -> (ProbeEngine, Arc<ValidListReporter<Vec<u8>>>) {
        let options = EngineOptions {
            concurrency,
            timeout,
            ..Default::default()
        };
        let reporter = Arc::new(ValidListReporter::new(Vec::new()));
        let mut engine = ProbeEngine::new(options, validator);
        engine.register_reporter(reporter.clone());
        (engine, reporter)
    }

    fn take_output(engine: ProbeEngine, reporter: Arc<ValidListReporter<Vec<u8>>>) -> String {
        drop(engine);
        let reporter = Arc::into_inner(reporter).expect("engine released the reporter");
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    fn no_shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    #[tokio::test]
    async fn test_concurrency_limit_is_respected() {
        let validator = Arc::new(CountingValidator::with_delay(Duration::from_millis(20)));
        let (engine, reporter) = engine_with_output(validator.clone(), 3, Duration::from_secs(5));

        let lines: Vec<String> =
            (0..20).map(|i| format!("trojan://ok{i}@10.0.0.{i}:443")).collect();
        let summary = engine.run(&lines, no_shutdown()).await;

        assert_eq!(validator.calls.load(Ordering::SeqCst), 20);
        let max = validator.max_running.load(Ordering::SeqCst);
        assert!(max <= 3, "saw {max} validations at once");
        assert!(max >= 1);
        assert_eq!(summary.succeeded, 20);

        let output = take_output(engine, reporter);
        let written: HashSet<&str> = output.lines().collect();
        let expected: HashSet<&str> = lines.iter().map(String::as_str).collect();
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_single_trojan_line() {
        let (engine, reporter) = engine_with_output(Arc::new(AcceptAll), 5, Duration::from_secs(5));

        let summary = engine.run(["trojan://pw123@1.2.3.4:443"], no_shutdown()).await;

        assert_eq!(summary.succeeded, 1);
        assert_eq!(take_output(engine, reporter), "trojan://pw123@1.2.3.4:443\n");
    }

    struct AcceptAll;

    #[async_trait]
    impl Validator for AcceptAll {
        async fn validate(&self, _config: &EngineConfig) -> ValidationOutcome {
            ValidationOutcome::Success
        }
    }

    #[tokio::test]
    async fn test_blank_lines_never_reach_validator() {
        let validator = Arc::new(CountingValidator::default());
        let (engine, reporter) = engine_with_output(validator.clone(), 5, Duration::from_secs(5));

        let summary = engine.run(["", "   ", "\t"], no_shutdown()).await;

        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary, RunSummary::default());
        assert_eq!(take_output(engine, reporter), "");
    }

    #[tokio::test]
    async fn test_output_is_exactly_the_accepted_set() {
        let validator = Arc::new(CountingValidator::with_delay(Duration::from_millis(5)));
        let (engine, reporter) = engine_with_output(validator.clone(), 4, Duration::from_secs(5));

        let lines = [
            "trojan://ok-a@1.1.1.1:443",
            "trojan://bad-b@2.2.2.2:443",
            "",
            "vless://no-at-sign",
            "ss://unsupported",
            "vless://uuid@host:443?type=ws&path=/x",
            "vless://uuid@host:443?type=ws&host=h.example.com&path=/x",
            "trojan://ok-c@3.3.3.3",
            "trojan://bad-d@4.4.4.4:8443",
        ];
        let summary = engine.run(lines, no_shutdown()).await;

        // Three lines fail to parse or build and never reach the validator.
        assert_eq!(validator.calls.load(Ordering::SeqCst), 5);
        assert_eq!(
            summary,
            RunSummary {
                total: 8,
                skipped: 3,
                succeeded: 3,
                failed: 2,
                timed_out: 0,
                cancelled: 0,
            }
        );

        let output = take_output(engine, reporter);
        let mut written: Vec<&str> = output.lines().collect();
        written.sort_unstable();
        assert_eq!(
            written,
            vec![
                "trojan://ok-a@1.1.1.1:443",
                "trojan://ok-c@3.3.3.3",
                "vless://uuid@host:443?type=ws&host=h.example.com&path=/x",
            ]
        );
    }

    #[tokio::test]
    async fn test_timeout_is_excluded_and_not_a_failure() {
        let validator = Arc::new(HangingValidator::default());
        let (engine, reporter) =
            engine_with_output(validator.clone(), 2, Duration::from_millis(50));

        let summary = engine.run(["trojan://pw123@1.2.3.4:443"], no_shutdown()).await;

        assert_eq!(validator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(summary.timed_out, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.succeeded, 0);
        assert_eq!(take_output(engine, reporter), "");
    }

    #[tokio::test]
    async fn test_shutdown_cancels_in_flight_and_stops_admission() {
        let validator = Arc::new(HangingValidator::default());
        let (engine, reporter) =
            engine_with_output(validator.clone(), 2, Duration::from_secs(3600));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown_tx.send(true).unwrap();
        });

        let lines: Vec<String> =
            (0..10).map(|i| format!("trojan://pw{i}@10.0.0.{i}:443")).collect();
        let summary = tokio::time::timeout(Duration::from_secs(5), engine.run(&lines, shutdown_rx))
            .await
            .expect("run returns after shutdown");

        assert_eq!(validator.calls.load(Ordering::SeqCst), 2);
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.validated(), 0);
        assert_eq!(take_output(engine, reporter), "");
    }

    #[tokio::test]
    async fn test_already_cancelled_admits_nothing() {
        let validator = Arc::new(CountingValidator::default());
        let (engine, reporter) = engine_with_output(validator.clone(), 2, Duration::from_secs(5));
        let (_shutdown_tx, shutdown_rx) = watch::channel(true);

        let summary = engine.run(["trojan://ok@1.2.3.4"], shutdown_rx).await;

        assert_eq!(validator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(summary, RunSummary::default());
        assert_eq!(take_output(engine, reporter), "");
    }
}
