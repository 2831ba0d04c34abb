//! Voice pool, time base, mixer and the scheduler that drives them.

pub mod allocator;
pub mod lookahead;
pub mod mixer;
pub mod scheduler;
pub mod timebase;

pub use allocator::{PoolStats, VoicePool};
pub use mixer::{EffectBus, NoEffects};
pub use timebase::TimeBase;
