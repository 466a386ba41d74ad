use std::{
    sync::Arc,
    time::{Duration, SystemTime},
};

use tokio::{
    task::JoinSet,
    time::{sleep, Instant},
};
use tracing::{debug, error, info, warn};

use crate::{
    catalog::{operational_definitions, Catalog, Definition, BASE_REGISTER},
    counters::Counters,
    error::BridgeError,
    home_assistant::HomeAssistantSink,
    janitza_reader::RegisterSource,
    metric::{decode, MetricValue},
    metric_cache::MetricCache,
    venus_grid::{GridAggregate, VenusGridSink},
};

/// Cadence the collector tries to hold.
pub const TARGET_CYCLE: Duration = Duration::from_millis(100);

/// What happened during one cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub metrics: usize,
    /// Time from issuing the request until fan-out finished.
    pub duration: Duration,
    /// Sleep applied to hold the cadence, `None` when the cycle overran.
    pub slept: Option<Duration>,
}

/// Remaining time of the cycle, or `None` if the work used it all up.
///
/// Each cycle stands alone: an overrun is not made up later.
pub fn pacing_delay(elapsed: Duration, target: Duration) -> Option<Duration> {
    target.checked_sub(elapsed).filter(|delay| !delay.is_zero())
}

/// Polls the meter at a fixed cadence and fans every reading out to the sinks.
pub struct Collector<S> {
    source: S,
    catalog: Arc<Catalog>,
    cache: Arc<MetricCache>,
    counters: Arc<Counters>,
    cycle_seconds: Arc<Definition>,
    cycle_count: Arc<Definition>,
    home_assistant: Option<Arc<HomeAssistantSink>>,
    venus: Option<Arc<VenusGridSink>>,
    target_cycle: Duration,
}

impl<S: RegisterSource> Collector<S> {
    pub fn new(
        source: S,
        catalog: Arc<Catalog>,
        cache: Arc<MetricCache>,
        counters: Arc<Counters>,
    ) -> Result<Self, BridgeError> {
        let (cycle_seconds, cycle_count) = operational_definitions()?;
        Ok(Self {
            source,
            catalog,
            cache,
            counters,
            cycle_seconds,
            cycle_count,
            home_assistant: None,
            venus: None,
            target_cycle: TARGET_CYCLE,
        })
    }

    pub fn with_home_assistant(mut self, sink: Arc<HomeAssistantSink>) -> Self {
        self.home_assistant = Some(sink);
        self
    }

    pub fn with_venus(mut self, sink: Arc<VenusGridSink>) -> Self {
        self.venus = Some(sink);
        self
    }

    pub fn with_target_cycle(mut self, target_cycle: Duration) -> Self {
        self.target_cycle = target_cycle;
        self
    }

    /// Runs cycles until one fails. Only ever returns with an error.
    pub async fn run(mut self) -> Result<(), BridgeError> {
        info!(
            "Collecting {} registers from {BASE_REGISTER} every {:?}",
            self.catalog.len(),
            self.target_cycle
        );
        let mut cycles: u64 = 0;
        loop {
            let report = self.run_cycle().await?;
            cycles += 1;
            if cycles == 1 {
                info!("Fetching registers took: {:?}", report.duration);
            }
            debug!(
                "Cycle {cycles}: {} metrics in {:?}, slept {:?}",
                report.metrics, report.duration, report.slept
            );
        }
    }

    /// Request, decode, fan out, count and pace a single cycle.
    ///
    /// A failed read or decode aborts before anything is published or counted.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, BridgeError> {
        let started = Instant::now();
        let raw = self
            .source
            .read_floats(BASE_REGISTER, self.catalog.len())
            .await?;
        let captured_at = SystemTime::now();
        let metrics = decode(self.catalog.definitions(), &raw, captured_at)?;

        let mut aggregate = GridAggregate::new();
        self.fan_out(&metrics, &mut aggregate).await;
        let duration = started.elapsed();

        self.record_cycle(duration).await?;

        let slept = pacing_delay(duration, self.target_cycle);
        match slept {
            Some(delay) => sleep(delay).await,
            None => debug!(
                "Cycle took {duration:?}, over the {:?} target",
                self.target_cycle
            ),
        }

        if let Some(venus) = &self.venus {
            if let Err(e) = venus.emit(aggregate).await {
                warn!("Publishing grid aggregate failed: {e}");
            }
        }

        Ok(CycleReport {
            metrics: metrics.len(),
            duration,
            slept,
        })
    }

    /// Aggregate writes happen here in catalog order; cache updates and
    /// publishes run as tasks that are all joined before returning.
    async fn fan_out(&self, metrics: &[MetricValue], aggregate: &mut GridAggregate) {
        let mut tasks = JoinSet::new();
        for metric in metrics {
            let grid_value = self
                .venus
                .as_ref()
                .and_then(|venus| venus.contribute(metric, aggregate));

            let metric = metric.clone();
            let cache = self.cache.clone();
            let home_assistant = self.home_assistant.clone();
            let venus = self.venus.clone();
            tasks.spawn(async move {
                cache.update(metric.clone()).await;
                if let Some(home_assistant) = home_assistant {
                    home_assistant.handle(&metric, &cache).await;
                }
                if let (Some(venus), Some(value)) = (venus, grid_value) {
                    if let Err(e) = venus.publish_metric(&metric, value).await {
                        warn!("Publishing {} to grid sink failed: {e}", metric.name());
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Fan-out task failed: {e}");
            }
        }
    }

    /// Feeds the cycle into the operational counters and the flat sink.
    async fn record_cycle(&self, duration: Duration) -> Result<(), BridgeError> {
        let seconds = self
            .counters
            .increment(&self.cycle_seconds, duration.as_secs_f64())
            .await?;
        let count = self.counters.increment_one(&self.cycle_count).await?;

        for metric in [seconds, count] {
            self.cache.update(metric.clone()).await;
            if let Some(home_assistant) = &self.home_assistant {
                home_assistant.handle(&metric, &self.cache).await;
            }
        }
        Ok(())
    }
}
