//! ferry-core
//!
//! Pipeline engine with implicit data edges, write-once task results and
//! idempotent environment promotion.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（names, spec, record, state, environment, errors）
//! - **graph**: 明示的な依存とデータ依存から組み立てる DAG
//! - **results**: write-once の result store と dispatch 時の resolver
//! - **identity**: ソース内容から導出する revision id
//! - **handlers**: task kind（`script`, `resolve-revision`, `build-image`, `deploy`）
//! - **app**: scheduler, pipeline runner, promoter, engine のワイヤリング
//! - **ports**: 抽象化レイヤー（SourceContent, ImageRegistry, DeploymentPlatform, Clock, IdGenerator）
//! - **impls**: ports のインメモリ実装とファイルシステム実装
//! - **config**: デフォルト値と `FERRY_*` 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod graph;
pub mod handlers;
pub mod identity;
pub mod impls;
pub mod ports;
pub mod results;
