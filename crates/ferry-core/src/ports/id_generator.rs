//! Id generation.

use ulid::Ulid;

use crate::domain::ids::{PromotionId, RunId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn run_id(&self) -> RunId;

    fn promotion_id(&self) -> PromotionId;
}

/// Time-ordered ULIDs whose timestamp part comes from a [`Clock`].
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn run_id(&self) -> RunId {
        RunId::from(self.next())
    }

    fn promotion_id(&self) -> PromotionId {
        PromotionId::from(self.next())
    }
}
