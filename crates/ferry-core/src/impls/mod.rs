//! Impls - ports の実装
//!
//! # 含まれる実装
//! - **InMemoryRegistry** / **InMemoryPlatform**: 開発用・テスト用の registry と platform
//! - **ClusterState**: 上記 2 つを JSON で保存・復元するためのスナップショット
//! - **DirectorySource** / **InMemorySource**: revision 導出用のソース

pub mod cluster;
pub mod memory_platform;
pub mod memory_registry;
pub mod source;

pub use self::cluster::ClusterState;
pub use self::memory_platform::InMemoryPlatform;
pub use self::memory_registry::{InMemoryRegistry, StoredImage};
pub use self::source::{DirectorySource, InMemorySource};
