// Transport statistics sampler
// (c) 2024 Ross Younger

//! # Rationale
//! A PUT is one frame sent with one `write_all`, so the foreground task is stuck in
//! that call for the whole transfer. To see the congestion window evolve we need a
//! second task that polls the socket's statistics on a timer while the send is in
//! progress. The two share nothing but the sample list; the poller reads socket
//! statistics through its own descriptor and never touches the data stream.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{trace, warn};

use super::TransportSample;
use crate::os::{NoStatistics, TransportStatistics};

/// When and how often to sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplingPolicy {
    /// Period of the background sampler
    pub interval: Duration,
    /// Transfers larger than this many bytes get periodic sampling.
    /// Smaller transfers are only sampled explicitly.
    pub threshold: u64,
}

impl SamplingPolicy {
    /// Default sampling period
    pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);
    /// Default size above which periodic sampling is used (1 MiB)
    pub const DEFAULT_THRESHOLD: u64 = 1024 * 1024;

    /// Does a transfer of this size warrant periodic sampling?
    #[must_use]
    pub fn wants_periodic(&self, transfer_size: u64) -> bool {
        transfer_size > self.threshold
    }
}

impl Default for SamplingPolicy {
    fn default() -> Self {
        Self {
            interval: Self::DEFAULT_INTERVAL,
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }
}

type SampleList = Arc<Mutex<Vec<TransportSample>>>;

fn lock(samples: &SampleList) -> MutexGuard<'_, Vec<TransportSample>> {
    // A panic while holding the lock cannot leave a Vec half-pushed, so poisoning is harmless.
    samples.lock().unwrap_or_else(PoisonError::into_inner)
}

fn take_sample(probe: &dyn TransportStatistics, samples: &SampleList) -> bool {
    match probe.transport_sample() {
        Some(sample) => {
            lock(samples).push(sample);
            true
        }
        None => false,
    }
}

/// Collects [`TransportSample`]s for one connection.
///
/// Samples may be taken explicitly with [`sample_once`](Self::sample_once), and/or
/// by a background task started with [`start_periodic`](Self::start_periodic).
/// Once [`stop`](Self::stop) has returned, the background task has finished and will
/// append nothing further.
pub struct TransportSampler {
    probe: Arc<dyn TransportStatistics>,
    samples: SampleList,
    task: Option<JoinHandle<()>>,
    stopper: Option<oneshot::Sender<()>>,
}

impl std::fmt::Debug for TransportSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportSampler")
            .field("samples", &self.len())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl TransportSampler {
    /// Creates a sampler around a statistics probe
    #[must_use]
    pub fn new(probe: Arc<dyn TransportStatistics>) -> Self {
        Self {
            probe,
            samples: SampleList::default(),
            task: None,
            stopper: None,
        }
    }

    /// Creates a sampler for a socket.
    ///
    /// If the socket can't be probed, the sampler quietly produces nothing.
    #[cfg(unix)]
    #[must_use]
    pub fn for_socket<S: std::os::fd::AsFd>(socket: &S) -> Self {
        match crate::os::SocketProbe::new(socket) {
            Ok(probe) => Self::new(Arc::new(probe)),
            Err(e) => {
                trace!("socket statistics unavailable: {e}");
                Self::disabled()
            }
        }
    }

    /// Creates a sampler that never produces samples
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(Arc::new(NoStatistics))
    }

    /// Takes one sample now, in the caller's task.
    /// Returns whether a sample was recorded.
    #[must_use = "the sample may not have been recorded"]
    pub fn sample_once(&self) -> bool {
        take_sample(self.probe.as_ref(), &self.samples)
    }

    /// Starts sampling every `period` in a background task, until [`stop`](Self::stop)ped.
    ///
    /// The first periodic sample is taken one period after starting.
    /// If periodic sampling was already running, it is restarted.
    ///
    /// # Panics
    /// If called outside of a tokio runtime.
    pub fn start_periodic(&mut self, period: Duration) {
        self.abort_task();
        let (tx, mut rx) = oneshot::channel();
        self.stopper = Some(tx);
        self.task = Some(tokio::spawn({
            let probe = self.probe.clone();
            let samples = self.samples.clone();
            async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                let _ = ticker.tick().await; // completes immediately
                loop {
                    tokio::select! {
                        _ = ticker.tick() => (),
                        _ = &mut rx => break,
                    }
                    let _ = take_sample(probe.as_ref(), &samples);
                }
                trace!("periodic sampling stopped");
            }
        }));
    }

    /// Stops periodic sampling.
    ///
    /// When this returns, the background task has finished; no more samples will
    /// be appended except by explicit calls to [`sample_once`](Self::sample_once).
    /// Calling this when nothing is running (including calling it twice) does nothing.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.stopper.take() {
            // If the receiver has gone, the task has already exited.
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task
                .await
                .inspect_err(|e| warn!("sampler task failed: {e}"));
        }
    }

    /// Is periodic sampling running?
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Number of samples collected so far
    #[must_use]
    pub fn len(&self) -> usize {
        lock(&self.samples).len()
    }

    /// Have we collected nothing?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the samples collected so far, in order
    #[must_use]
    pub fn samples(&self) -> Vec<TransportSample> {
        lock(&self.samples).clone()
    }

    /// Removes and returns the samples collected so far
    #[must_use]
    pub fn take_samples(&self) -> Vec<TransportSample> {
        std::mem::take(&mut *lock(&self.samples))
    }

    /// Discards all samples
    pub fn clear(&self) {
        lock(&self.samples).clear();
    }

    fn abort_task(&mut self) {
        let _ = self.stopper.take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for TransportSampler {
    fn drop(&mut self) {
        self.abort_task();
    }
}

#[cfg(test)]
mod test {
    use super::{SamplingPolicy, TransportSampler};
    use crate::os::TransportStatistics;
    use crate::telemetry::TransportSample;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    /// Counts its calls, and reports the count as retransmissions
    #[derive(Default)]
    struct CountingProbe {
        calls: AtomicU32,
    }

    impl TransportStatistics for CountingProbe {
        fn transport_sample(&self) -> Option<TransportSample> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Some(TransportSample {
                timestamp: time::OffsetDateTime::now_utc(),
                round_trip_time: 100,
                round_trip_time_variance: 10,
                congestion_window: 10 + n,
                slow_start_threshold: u32::MAX,
                current_retransmits: 0,
                retransmit_count: n,
                bytes_acknowledged: 0,
                bytes_received: 0,
                segments_out: n,
                segments_in: n,
            })
        }
    }

    #[test]
    fn explicit_samples() {
        let sampler = TransportSampler::new(Arc::new(CountingProbe::default()));
        assert!(sampler.is_empty());
        assert!(sampler.sample_once());
        assert!(sampler.sample_once());
        let samples = sampler.samples();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].retransmit_count, 1);
        sampler.clear();
        assert!(sampler.is_empty());
    }

    #[test]
    fn disabled_sampler_is_silent() {
        let sampler = TransportSampler::disabled();
        assert!(!sampler.sample_once());
        assert!(sampler.is_empty());
    }

    #[tokio::test]
    async fn periodic_then_frozen() {
        let mut sampler = TransportSampler::new(Arc::new(CountingProbe::default()));
        sampler.start_periodic(Duration::from_millis(2));
        assert!(sampler.is_running());
        tokio::time::sleep(Duration::from_millis(50)).await;
        sampler.stop().await;
        assert!(!sampler.is_running());

        let frozen = sampler.len();
        assert!(frozen > 0);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sampler.len(), frozen);

        // idempotent
        sampler.stop().await;
        assert_eq!(sampler.len(), frozen);

        // foreground samples are still allowed
        assert!(sampler.sample_once());
        assert_eq!(sampler.len(), frozen + 1);

        let samples = sampler.take_samples();
        assert!(samples
            .windows(2)
            .all(|w| w[0].retransmit_count <= w[1].retransmit_count));
        assert!(sampler.is_empty());
    }

    #[tokio::test]
    async fn stop_does_not_wait_for_the_interval() {
        let mut sampler = TransportSampler::new(Arc::new(CountingProbe::default()));
        sampler.start_periodic(Duration::from_secs(3600));
        tokio::time::timeout(Duration::from_secs(5), sampler.stop())
            .await
            .expect("stop should return promptly");
        assert!(sampler.is_empty());
    }

    #[tokio::test]
    async fn stop_without_start() {
        let mut sampler = TransportSampler::disabled();
        sampler.stop().await;
        sampler.stop().await;
    }

    #[test]
    fn policy() {
        let policy = SamplingPolicy::default();
        assert_eq!(policy.interval, Duration::from_millis(100));
        assert!(!policy.wants_periodic(1024 * 1024));
        assert!(policy.wants_periodic(1024 * 1024 + 1));
    }
}
