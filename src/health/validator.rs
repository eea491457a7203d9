//! 周期验证器
//!
//! `SingleTargetValidator` 对一个固定目标周期性执行检测；
//! `FleetValidator` 每个tick重新获取目标列表，并发检测所有目标，
//! 并为每个目标维护独立的去抖状态。
//!
//! 每个tick的流程不重叠：下一次tick的检测必须等本次的状态更新和事件发送完成后才开始。

use crate::directory::TargetDirectory;
use crate::error::{ConfigError, DirectoryError, HealthCheckError, Result};
use crate::health::check::{HealthCheck, Target, TargetName};
use crate::health::debounce::{DebounceState, StateTable, Transition};
use crate::health::result::CheckResult;
use futures::future::join_all;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// 检测调度参数，在验证器生命周期内不变
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    interval: Duration,
    grace: Duration,
}

impl Schedule {
    /// 创建调度参数
    ///
    /// # 参数
    /// * `interval` - 检测间隔，必须大于0
    /// * `grace` - 宽限期，持续不健康超过该时长才升级为Down
    pub fn new(interval: Duration, grace: Duration) -> std::result::Result<Self, ConfigError> {
        if interval.is_zero() {
            return Err(ConfigError::ValidationError("检测间隔不能为0".to_string()));
        }
        Ok(Self { interval, grace })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn grace(&self) -> Duration {
        self.grace
    }
}

/// 验证器事件类型
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    /// 开始失败，仍在宽限期内
    StartedFailing { detail: Option<String> },
    /// 持续失败超过宽限期，每个失败周期只发送一次
    Down { detail: Option<String> },
    /// 从Down恢复
    Recovered,
    /// 每个tick都会发送的原始检测结果
    CheckCompleted { result: CheckResult },
}

impl EventKind {
    fn from_transition(transition: Transition, result: &CheckResult) -> Self {
        match transition {
            Transition::StartedFailing => EventKind::StartedFailing {
                detail: result.detail.clone(),
            },
            Transition::Down => EventKind::Down {
                detail: result.detail.clone(),
            },
            Transition::Recovered => EventKind::Recovered,
        }
    }

    /// 是否为边沿事件
    pub fn is_edge(&self) -> bool {
        !matches!(self, EventKind::CheckCompleted { .. })
    }
}

/// 单个目标的事件
#[derive(Debug, Clone, Serialize)]
pub struct TargetEvent {
    /// 目标标识
    pub target: TargetName,
    /// 验证器内的tick序号，从1开始
    pub tick: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// 集群验证器事件
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// 目标事件
    Target(TargetEvent),
    /// 目标发现失败，本次tick被放弃
    DiscoveryFailed { tick: u64, error: String },
}

impl From<TargetEvent> for FleetEvent {
    fn from(event: TargetEvent) -> Self {
        FleetEvent::Target(event)
    }
}

type CheckOutcome = (std::result::Result<(), HealthCheckError>, Duration);

/// 本次tick正在执行的检测任务，被丢弃时中止所有未完成任务
struct InFlight {
    handles: Vec<(Target, JoinHandle<CheckOutcome>)>,
}

impl InFlight {
    fn spawn(check: &Arc<dyn HealthCheck>, targets: Vec<Target>, semaphore: &Arc<Semaphore>) -> Self {
        let handles = targets
            .into_iter()
            .map(|target| {
                let check = Arc::clone(check);
                let semaphore = Arc::clone(semaphore);
                let task_target = target.clone();
                let handle = tokio::spawn(async move {
                    // 信号量不会被关闭，获取失败时直接执行
                    let _permit = semaphore.acquire_owned().await.ok();
                    let started = Instant::now();
                    let outcome = check.check(&task_target).await;
                    (outcome, started.elapsed())
                });
                (target, handle)
            })
            .collect();

        Self { handles }
    }

    async fn join(mut self, observed_at: Instant) -> Vec<(Target, CheckResult)> {
        let joined = join_all(self.handles.iter_mut().map(|(_, handle)| handle)).await;

        std::mem::take(&mut self.handles)
            .into_iter()
            .zip(joined)
            .map(|((target, _), joined)| {
                let result = fold_join(observed_at, joined);
                (target, result)
            })
            .collect()
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        for (_, handle) in &self.handles {
            handle.abort();
        }
    }
}

/// 把检测任务的执行结果折叠为检测结果，任务panic或被取消都视为不健康
fn fold_join(
    observed_at: Instant,
    joined: std::result::Result<CheckOutcome, JoinError>,
) -> CheckResult {
    match joined {
        Ok((outcome, elapsed)) => {
            CheckResult::from_outcome(observed_at, outcome).with_response_time(elapsed)
        }
        Err(e) if e.is_panic() => {
            let payload = e.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            CheckResult::from_outcome(observed_at, Err(HealthCheckError::Panicked(message)))
        }
        Err(_) => CheckResult::from_outcome(observed_at, Err(HealthCheckError::Cancelled)),
    }
}

/// 关闭信号
///
/// 发送端全部释放后不再视为关闭请求，此时验证器只会在事件接收端关闭时停止
struct Shutdown {
    receiver: broadcast::Receiver<()>,
    detached: bool,
}

impl Shutdown {
    fn new(receiver: broadcast::Receiver<()>) -> Self {
        Self {
            receiver,
            detached: false,
        }
    }

    /// 等待关闭信号，可安全地在 `select!` 中取消
    async fn recv(&mut self) {
        if !self.detached {
            match self.receiver.recv().await {
                Ok(()) | Err(RecvError::Lagged(_)) => return,
                Err(RecvError::Closed) => {
                    warn!("关闭信号发送端已全部释放，验证器将持续运行直到事件接收端关闭");
                    self.detached = true;
                }
            }
        }
        std::future::pending::<()>().await
    }
}

/// 一次事件投递的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Delivered,
    ReceiverClosed,
    Shutdown,
}

/// 投递单个事件，接收端积压时仍响应关闭信号
async fn deliver<E>(events: &mpsc::Sender<E>, event: E, shutdown: &mut Shutdown) -> Delivery {
    tokio::select! {
        biased;
        _ = shutdown.recv() => Delivery::Shutdown,
        sent = events.send(event) => match sent {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::ReceiverClosed,
        },
    }
}

/// 发送一个目标本次tick的全部事件：边沿事件在前，原始结果在后
async fn send_target_events<E: From<TargetEvent>>(
    events: &mpsc::Sender<E>,
    shutdown: &mut Shutdown,
    target: &TargetName,
    tick: u64,
    transitions: Vec<Transition>,
    result: CheckResult,
) -> Delivery {
    let edges: Vec<EventKind> = transitions
        .into_iter()
        .map(|t| EventKind::from_transition(t, &result))
        .collect();
    let kinds = edges
        .into_iter()
        .chain(std::iter::once(EventKind::CheckCompleted { result }));

    for kind in kinds {
        let event = TargetEvent {
            target: target.clone(),
            tick,
            kind,
        };
        let delivery = deliver(events, event.into(), shutdown).await;
        if delivery != Delivery::Delivered {
            return delivery;
        }
    }
    Delivery::Delivered
}

fn ticker(schedule: &Schedule) -> tokio::time::Interval {
    let mut ticker = interval(schedule.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

/// 单目标验证器
pub struct SingleTargetValidator {
    target: Target,
    schedule: Schedule,
    check: Arc<dyn HealthCheck>,
}

impl SingleTargetValidator {
    pub fn new(target: Target, schedule: Schedule, check: Arc<dyn HealthCheck>) -> Self {
        Self {
            target,
            schedule,
            check,
        }
    }

    /// 运行验证器直到收到关闭信号或事件接收端关闭
    ///
    /// # 参数
    /// * `events` - 事件发送端
    /// * `shutdown` - 关闭信号接收器；发送端全部释放时不会停止验证器
    pub async fn run(
        self,
        events: mpsc::Sender<TargetEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut shutdown = Shutdown::new(shutdown);
        let semaphore = Arc::new(Semaphore::new(1));
        let mut state = DebounceState::new();
        let mut ticker = ticker(&self.schedule);
        let mut tick: u64 = 0;

        info!(
            "启动单目标验证器: {} ({}), 间隔 {:?}, 宽限期 {:?}",
            self.target.name,
            self.target.uri,
            self.schedule.interval(),
            self.schedule.grace()
        );

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }
            // 以实际触发时刻为观测时刻，迟到的tick不会被记在过去的计划时刻上
            let observed_at = Instant::now();
            tick += 1;
            debug!("tick {} 开始检测: {}", tick, self.target.name);

            let in_flight = InFlight::spawn(&self.check, vec![self.target.clone()], &semaphore);
            let mut results = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("收到关闭信号，放弃进行中的检测: {}", self.target.name);
                    break;
                }
                results = in_flight.join(observed_at) => results,
            };

            let Some((_, result)) = results.pop() else {
                continue;
            };
            let transitions =
                state.evaluate(result.healthy, result.observed_at, self.schedule.grace());

            match send_target_events(
                &events,
                &mut shutdown,
                &self.target.name,
                tick,
                transitions,
                result,
            )
            .await
            {
                Delivery::Delivered => {}
                Delivery::ReceiverClosed => {
                    info!("事件接收端已关闭，停止验证器: {}", self.target.name);
                    break;
                }
                Delivery::Shutdown => {
                    info!("收到关闭信号，停止发送事件: {}", self.target.name);
                    break;
                }
            }
        }

        info!("单目标验证器已停止: {}", self.target.name);
        Ok(())
    }
}

/// 集群验证器
pub struct FleetValidator {
    directory: Arc<dyn TargetDirectory>,
    check: Arc<dyn HealthCheck>,
    schedule: Schedule,
    include_offline: bool,
    max_concurrent_checks: usize,
}

impl FleetValidator {
    /// 默认最大并发检测数
    pub const DEFAULT_MAX_CONCURRENT_CHECKS: usize = 16;

    pub fn new(
        directory: Arc<dyn TargetDirectory>,
        check: Arc<dyn HealthCheck>,
        schedule: Schedule,
    ) -> Self {
        Self {
            directory,
            check,
            schedule,
            include_offline: false,
            max_concurrent_checks: Self::DEFAULT_MAX_CONCURRENT_CHECKS,
        }
    }

    /// 是否包含管理上离线的成员
    pub fn with_include_offline(mut self, include_offline: bool) -> Self {
        self.include_offline = include_offline;
        self
    }

    /// 设置最大并发检测数
    pub fn with_max_concurrent_checks(mut self, max_concurrent_checks: usize) -> Self {
        self.max_concurrent_checks = max_concurrent_checks.max(1);
        self
    }

    /// 运行验证器直到收到关闭信号或事件接收端关闭
    ///
    /// 目标发现失败时本次tick不做任何检测，通过 `FleetEvent::DiscoveryFailed` 通知调用方。
    /// 关闭信号的发送端全部释放时不会停止验证器。
    pub async fn run(
        self,
        events: mpsc::Sender<FleetEvent>,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut shutdown = Shutdown::new(shutdown);
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_checks));
        let mut table = StateTable::new();
        let mut ticker = ticker(&self.schedule);
        let mut tick: u64 = 0;

        info!(
            "启动集群验证器，间隔 {:?}, 宽限期 {:?}, 包含离线节点: {}, 最大并发: {}",
            self.schedule.interval(),
            self.schedule.grace(),
            self.include_offline,
            self.max_concurrent_checks
        );

        'ticks: loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }
            tick += 1;

            let discovered = tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                discovered = self.directory.targets(self.include_offline) => discovered,
            };

            let targets = match discovered {
                Ok(targets) => dedup_targets(targets),
                Err(e) => {
                    error!("tick {} 获取目标列表失败，放弃本次检测: {}", tick, e);
                    let event = FleetEvent::DiscoveryFailed {
                        tick,
                        error: e.to_string(),
                    };
                    match deliver(&events, event, &mut shutdown).await {
                        Delivery::Delivered => continue,
                        Delivery::ReceiverClosed => info!("事件接收端已关闭，停止集群验证器"),
                        Delivery::Shutdown => info!("收到关闭信号，停止发送事件"),
                    }
                    break;
                }
            };

            let names: Vec<TargetName> = targets.iter().map(|t| t.name.clone()).collect();
            let reconciliation = table.reconcile(&names);
            if !reconciliation.is_empty() {
                info!(
                    "目标集合变化: 新增 {:?}, 移除 {:?}",
                    reconciliation.added, reconciliation.evicted
                );
            }
            debug!("tick {} 开始检测 {} 个目标", tick, targets.len());

            // 目标发现之后才开始检测，观测时刻取检测开始的实际时刻
            let observed_at = Instant::now();

            let in_flight = InFlight::spawn(&self.check, targets, &semaphore);
            let results = tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("收到关闭信号，放弃进行中的检测");
                    break;
                }
                results = in_flight.join(observed_at) => results,
            };

            for (target, result) in results {
                let transitions = table.evaluate(&target.name, &result, self.schedule.grace());
                match send_target_events(
                    &events,
                    &mut shutdown,
                    &target.name,
                    tick,
                    transitions,
                    result,
                )
                .await
                {
                    Delivery::Delivered => {}
                    Delivery::ReceiverClosed => {
                        info!("事件接收端已关闭，停止集群验证器");
                        break 'ticks;
                    }
                    Delivery::Shutdown => {
                        info!("收到关闭信号，停止发送事件");
                        break 'ticks;
                    }
                }
            }
        }

        info!("集群验证器已停止");
        Ok(())
    }
}

/// 同一次目标发现中重复出现的标识只保留第一个
fn dedup_targets(targets: Vec<Target>) -> Vec<Target> {
    let mut seen = HashSet::new();
    targets
        .into_iter()
        .filter(|target| {
            let first = seen.insert(target.name.clone());
            if !first {
                warn!("目标列表中存在重复标识，忽略: {}", target.name);
            }
            first
        })
        .collect()
}

/// 对目标列表执行一次不带去抖的检测
///
/// # 参数
/// * `directory` - 目标发现
/// * `check` - 健康检测
/// * `include_offline` - 是否包含离线成员
/// * `max_concurrent_checks` - 最大并发检测数
pub async fn validate_all(
    directory: &dyn TargetDirectory,
    check: Arc<dyn HealthCheck>,
    include_offline: bool,
    max_concurrent_checks: usize,
) -> std::result::Result<Vec<(Target, CheckResult)>, DirectoryError> {
    let targets = dedup_targets(directory.targets(include_offline).await?);
    Ok(validate_targets(check, targets, max_concurrent_checks).await)
}

/// 对给定目标执行一次不带去抖的检测
pub async fn validate_targets(
    check: Arc<dyn HealthCheck>,
    targets: Vec<Target>,
    max_concurrent_checks: usize,
) -> Vec<(Target, CheckResult)> {
    let semaphore = Arc::new(Semaphore::new(max_concurrent_checks.max(1)));
    InFlight::spawn(&check, targets, &semaphore)
        .join(Instant::now())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct PanickingCheck;

    #[async_trait]
    impl HealthCheck for PanickingCheck {
        async fn check(&self, _target: &Target) -> std::result::Result<(), HealthCheckError> {
            panic!("stats endpoint exploded");
        }
    }

    struct NamedCheck;

    #[async_trait]
    impl HealthCheck for NamedCheck {
        async fn check(&self, target: &Target) -> std::result::Result<(), HealthCheckError> {
            if target.name.as_str().starts_with("bad") {
                Err(HealthCheckError::Decode("bad target".to_string()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn test_schedule_rejects_zero_interval() {
        assert!(Schedule::new(Duration::ZERO, Duration::from_secs(1)).is_err());

        let schedule = Schedule::new(Duration::from_secs(1), Duration::ZERO).unwrap();
        assert_eq!(schedule.interval(), Duration::from_secs(1));
        assert_eq!(schedule.grace(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_panicking_check_is_folded_into_unhealthy() {
        let results = validate_targets(
            Arc::new(PanickingCheck),
            vec![Target::new("tm-01", "http://tm-01")],
            4,
        )
        .await;

        assert_eq!(results.len(), 1);
        let (_, result) = &results[0];
        assert!(!result.healthy);
        assert!(result.detail.as_deref().unwrap().contains("stats endpoint exploded"));
    }

    #[tokio::test]
    async fn test_validate_targets_preserves_order() {
        let targets = vec![
            Target::new("good-1", "http://good-1"),
            Target::new("bad-1", "http://bad-1"),
            Target::new("good-2", "http://good-2"),
        ];

        let results = validate_targets(Arc::new(NamedCheck), targets, 2).await;
        let verdicts: Vec<(&str, bool)> = results
            .iter()
            .map(|(t, r)| (t.name.as_str(), r.healthy))
            .collect();
        assert_eq!(
            verdicts,
            vec![("good-1", true), ("bad-1", false), ("good-2", true)]
        );
    }

    #[test]
    fn test_dedup_targets_keeps_first() {
        let targets = dedup_targets(vec![
            Target::new("a", "http://a-1"),
            Target::new("b", "http://b"),
            Target::new("a", "http://a-2"),
        ]);

        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].uri, "http://a-1");
    }

    #[test]
    fn test_event_serialization() {
        let event = FleetEvent::Target(TargetEvent {
            target: TargetName::from("tm-01"),
            tick: 4,
            kind: EventKind::Down {
                detail: Some("stale".to_string()),
            },
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "target");
        assert_eq!(json["target"], "tm-01");
        assert_eq!(json["tick"], 4);
        assert_eq!(json["event"], "down");
        assert_eq!(json["detail"], "stale");

        let failed = FleetEvent::DiscoveryFailed {
            tick: 2,
            error: "timeout".to_string(),
        };
        let json = serde_json::to_value(&failed).unwrap();
        assert_eq!(json["type"], "discovery_failed");
        assert_eq!(json["error"], "timeout");
    }

    #[test]
    fn test_edge_classification() {
        assert!(EventKind::Recovered.is_edge());
        assert!(!EventKind::CheckCompleted {
            result: CheckResult::healthy(Instant::now())
        }
        .is_edge());
    }
}
