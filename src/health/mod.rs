//! 健康验证模块
//!
//! 提供可插拔的健康检测、去抖状态机和周期验证器

pub mod check;
pub mod debounce;
pub mod peer_poller;
pub mod result;
pub mod validator;

// 重新导出主要类型
pub use check::{HealthCheck, Target, TargetName};
pub use debounce::{Classification, DebounceState, Reconciliation, StateTable, Transition};
pub use peer_poller::PeerPollerCheck;
pub use result::CheckResult;
pub use validator::{
    validate_all, validate_targets, EventKind, FleetEvent, FleetValidator, Schedule,
    SingleTargetValidator, TargetEvent,
};
