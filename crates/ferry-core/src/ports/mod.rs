//! Ports - 抽象化レイヤー
//!
//! 外部システム（ソースのチェックアウト, image registry, デプロイ先の
//! platform）へのインターフェースを定義します。
//! 各 trait は [`crate::impls`] にインメモリ実装があり、実際の platform
//! なしで engine を end to end で動かせます。

pub mod clock;
pub mod id_generator;
pub mod platform;
pub mod registry;
pub mod source;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::platform::{DeploymentPlatform, PlatformError, ResourceKind};
pub use self::registry::{BuildRequest, ImageBuilder, ImageRegistry, RegistryError, TagOutcome};
pub use self::source::{SourceContent, SourceEntry, SourceError, SourceSnapshot};
