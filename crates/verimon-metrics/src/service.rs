use crate::alert::secs;
use crate::collector::MetricsCollector;
use crate::config::MonitorConfig;
use crate::engine::AlertEngine;
use crate::error::Result;
use crate::exporter::Exporter;
use crate::health::{CollectorProbe, HealthAggregator, NotificationProbe, SystemProbe};
use crate::system::SystemSampler;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info};
use verimon_notify::Dispatcher;

/// 后台任务句柄，`shutdown` 会等待所有循环结束当前这一轮
pub struct MonitorTaskHandle {
    shutdown_tx: watch::Sender<bool>,
    join_handles: Vec<JoinHandle<()>>,
}

impl MonitorTaskHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.join_handles {
            let _ = handle.await;
        }
    }

    pub fn abort(self) {
        for handle in self.join_handles {
            handle.abort();
        }
    }

    pub fn task_count(&self) -> usize {
        self.join_handles.len()
    }
}

/// 监控服务：组装收集器、规则引擎、健康聚合器和导出器，并驱动后台循环
pub struct MonitorService {
    config: MonitorConfig,
    collector: Arc<MetricsCollector>,
    dispatcher: Arc<Dispatcher>,
    engine: Arc<AlertEngine>,
    health: Arc<HealthAggregator>,
    sampler: Arc<SystemSampler>,
    exporter: Exporter,
}

impl MonitorService {
    /// 按配置创建服务，渠道由 `config.channels` 决定
    pub async fn new(config: MonitorConfig) -> Result<Self> {
        let dispatcher = Arc::new(Dispatcher::from_config(&config.channels)?);
        Self::with_dispatcher(config, dispatcher).await
    }

    /// 使用外部提供的派发器创建服务
    pub async fn with_dispatcher(config: MonitorConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        config.validate()?;
        info!("Initializing MonitorService");

        let collector = Arc::new(MetricsCollector::new(config.series_capacity, config.max_series));
        for metric in &config.metrics {
            let help = if metric.help.is_empty() { &metric.name } else { &metric.help };
            collector.describe(&metric.name, metric.metric_type, help)?;
        }

        let sampler = Arc::new(SystemSampler::new(collector.clone()));

        let engine = Arc::new(
            AlertEngine::new(collector.clone(), dispatcher.clone())
                .with_history_capacity(config.history_capacity)
                .with_max_alert_age(secs(config.max_alert_age_secs)),
        );
        for rule in &config.rules {
            engine.add_rule(rule.clone()).await?;
        }

        let health = Arc::new(HealthAggregator::new());
        health.register(Arc::new(SystemProbe::new(sampler.clone())));
        health.register(Arc::new(CollectorProbe::new(collector.clone())));
        health.register(Arc::new(NotificationProbe::new(dispatcher.clone())));

        let exporter = Exporter::new(collector.clone())
            .with_alerts(engine.clone())
            .with_namespace(config.exporter_namespace.clone());

        info!(
            "MonitorService ready: {} metrics declared, {} rules, channels {:?}",
            config.metrics.len(),
            config.rules.len(),
            dispatcher.channels()
        );

        Ok(Self {
            config,
            collector,
            dispatcher,
            engine,
            health,
            sampler,
            exporter,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn collector(&self) -> &Arc<MetricsCollector> {
        &self.collector
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn health(&self) -> &Arc<HealthAggregator> {
        &self.health
    }

    pub fn exporter(&self) -> &Exporter {
        &self.exporter
    }

    /// 启动所有后台循环
    pub fn start(&self) -> MonitorTaskHandle {
        info!("Starting monitor background tasks");
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut join_handles = Vec::new();

        let engine = self.engine.clone();
        join_handles.push(spawn_loop(
            "evaluation",
            self.config.evaluation_interval_secs,
            shutdown_rx.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    let summary = engine.evaluate().await;
                    debug!("Rule evaluation finished: {:?}", summary);
                }
            },
        ));

        let engine = self.engine.clone();
        join_handles.push(spawn_loop(
            "escalation",
            self.config.escalation_interval_secs,
            shutdown_rx.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    let summary = engine.check_escalations().await;
                    debug!("Escalation check finished: {:?}", summary);
                }
            },
        ));

        let engine = self.engine.clone();
        join_handles.push(spawn_loop(
            "cooldown-cleanup",
            self.config.cooldown_cleanup_interval_secs,
            shutdown_rx.clone(),
            move || {
                let engine = engine.clone();
                async move {
                    engine.cleanup_cooldowns().await;
                }
            },
        ));

        let health = self.health.clone();
        join_handles.push(spawn_loop(
            "health",
            self.config.health_interval_secs,
            shutdown_rx.clone(),
            move || {
                let health = health.clone();
                async move {
                    match tokio::task::spawn_blocking(move || health.run_checks()).await {
                        Ok(status) => debug!("Health check finished: {}", status.as_str()),
                        Err(e) => error!("Health check task failed: {}", e),
                    }
                }
            },
        ));

        let sampler = self.sampler.clone();
        join_handles.push(spawn_loop(
            "system-sampling",
            self.config.system_sample_interval_secs,
            shutdown_rx,
            move || {
                let sampler = sampler.clone();
                async move {
                    if let Err(e) = tokio::task::spawn_blocking(move || sampler.sample()).await {
                        error!("System sampling task failed: {}", e);
                    }
                }
            },
        ));

        MonitorTaskHandle {
            shutdown_tx,
            join_handles,
        }
    }
}

/// 按固定间隔执行 `tick`，收到关闭信号后退出；进行中的一轮会先完成
fn spawn_loop<F, Fut>(
    name: &'static str,
    period_secs: u64,
    mut shutdown_rx: watch::Receiver<bool>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = interval(std::time::Duration::from_secs(period_secs.max(1)));
        debug!("Background task {} started", name);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tick().await;
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        debug!("Background task {} stopped", name);
    })
}
