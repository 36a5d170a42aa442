//! App - アプリケーション層
//!
//! graph, result store, handlers, ports を組み合わせて pipeline の実行と
//! artifact の promotion を実装します。
//!
//! # 主要コンポーネント
//! - **EngineBuilder**: ワイヤリングと fail-fast な検証
//! - **PipelineRunner**: 1 回の pipeline run（開始から report まで）
//! - **Scheduler**: ready な task の dispatch と失敗時の扱い
//! - **Promoter**: ビルド済み image を環境間で昇格
//! - **Reconciler**: 1 つの (app, environment) slot を live deployment 1 つに収束

pub mod builder;
pub mod pipeline;
pub mod promoter;
pub mod reconcile;
pub mod scheduler;

// 主要な型を再エクスポート
pub use self::builder::{BuildError, Engine, EngineBuilder};
pub use self::pipeline::{PipelineRunner, RunReport};
pub use self::promoter::{PromotionError, PromotionReport, PromotionRequest, Promoter};
pub use self::reconcile::{
    CleanupPolicy, CleanupWarning, ReconcileError, ReconcileOutcome, Reconciler, RoutePolicy,
    SlotGuard,
};
pub use self::scheduler::{FailurePolicy, RunOutcome, Scheduler, SchedulerOptions};
