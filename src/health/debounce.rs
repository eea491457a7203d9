//! 去抖状态机
//!
//! 每个目标一个 `DebounceState`，在宽限期内吸收短暂失败，
//! 只在状态跨越边沿（进入Down、从Down恢复）时产生转换。
//!
//! ```text
//! Healthy --不健康--> Failing --持续 >= grace--> Down
//!    ^                   |                        |
//!    +------健康(静默)----+                        |
//!    +------健康(Recovered)-----------------------+
//! ```

use crate::health::check::TargetName;
use crate::health::result::CheckResult;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// 目标健康分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// 健康（初始状态）
    #[default]
    Healthy,
    /// 不健康，但仍在宽限期内
    Failing,
    /// 不健康且超过宽限期
    Down,
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Classification::Healthy => write!(f, "healthy"),
            Classification::Failing => write!(f, "failing"),
            Classification::Down => write!(f, "down"),
        }
    }
}

/// 单次评估产生的边沿转换
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Healthy -> Failing
    StartedFailing,
    /// Failing -> Down，每个失败周期只出现一次
    Down,
    /// Down -> Healthy
    Recovered,
}

/// 单个目标的去抖状态
///
/// 不变量：`failing_since` 有值当且仅当分类为 Failing 或 Down
#[derive(Debug, Clone, Default)]
pub struct DebounceState {
    classification: Classification,
    failing_since: Option<Instant>,
}

impl DebounceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classification(&self) -> Classification {
        self.classification
    }

    /// 当前失败周期的开始时间
    pub fn failing_since(&self) -> Option<Instant> {
        self.failing_since
    }

    /// 输入一次检测结论，推进状态机
    ///
    /// # 参数
    /// * `healthy` - 本次检测是否健康
    /// * `at` - 本次检测的观测时刻
    /// * `grace` - 宽限期
    ///
    /// # 返回
    /// * `Vec<Transition>` - 本次产生的转换；宽限期为0时进入失败的同一tick可能同时产生
    ///   `StartedFailing` 和 `Down`
    pub fn evaluate(&mut self, healthy: bool, at: Instant, grace: Duration) -> Vec<Transition> {
        let mut transitions = Vec::new();

        if healthy {
            // 只有到达过Down的失败周期才算"恢复"
            if self.classification == Classification::Down {
                transitions.push(Transition::Recovered);
            }
            self.classification = Classification::Healthy;
            self.failing_since = None;
            return transitions;
        }

        let since = match (self.classification, self.failing_since) {
            (Classification::Failing | Classification::Down, Some(since)) => since,
            _ => {
                self.classification = Classification::Failing;
                self.failing_since = Some(at);
                transitions.push(Transition::StartedFailing);
                at
            }
        };

        if self.classification == Classification::Failing
            && at.saturating_duration_since(since) >= grace
        {
            self.classification = Classification::Down;
            transitions.push(Transition::Down);
        }

        transitions
    }
}

/// 一次对账的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// 新出现的目标
    pub added: Vec<TargetName>,
    /// 已消失并被删除状态的目标
    pub evicted: Vec<TargetName>,
}

impl Reconciliation {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.evicted.is_empty()
    }
}

/// 目标标识 -> 去抖状态 的状态表
#[derive(Debug, Default)]
pub struct StateTable {
    states: HashMap<TargetName, DebounceState>,
}

impl StateTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取目标状态，不存在时以Healthy初始化
    pub fn upsert(&mut self, name: &TargetName) -> &mut DebounceState {
        self.states.entry(name.clone()).or_default()
    }

    /// 用一次检测结果推进目标状态
    pub fn evaluate(
        &mut self,
        name: &TargetName,
        result: &CheckResult,
        grace: Duration,
    ) -> Vec<Transition> {
        self.upsert(name)
            .evaluate(result.healthy, result.observed_at, grace)
    }

    /// 删除目标状态，不产生任何事件
    pub fn evict(&mut self, name: &str) -> Option<DebounceState> {
        self.states.remove(name)
    }

    /// 按当前目标集合对账：删除已消失的目标，为新目标建立初始状态
    pub fn reconcile(&mut self, current: &[TargetName]) -> Reconciliation {
        let current_set: HashSet<&str> = current.iter().map(TargetName::as_str).collect();

        let mut evicted: Vec<TargetName> = self
            .states
            .keys()
            .filter(|name| !current_set.contains(name.as_str()))
            .cloned()
            .collect();
        evicted.sort();
        for name in &evicted {
            self.states.remove(name.as_str());
            debug!("删除已消失目标的状态: {}", name);
        }

        let mut added = Vec::new();
        for name in current {
            if !self.states.contains_key(name.as_str()) {
                self.states.insert(name.clone(), DebounceState::new());
                added.push(name.clone());
            }
        }

        Reconciliation { added, evicted }
    }

    pub fn get(&self, name: &str) -> Option<&DebounceState> {
        self.states.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.states.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// 按名称排序的目标列表
    pub fn names(&self) -> Vec<TargetName> {
        let mut names: Vec<TargetName> = self.states.keys().cloned().collect();
        names.sort();
        names
    }
}
