pub mod achievements;
pub mod config;
pub mod errors;
pub mod round;
pub mod state;
pub mod sync;
pub mod text;

pub use achievements::{
    Achievement, AchievementCatalog, AchievementLedger, Difficulty, LedgerError,
    StateAchievementLedger, Unlocked,
};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use round::{QuizRound, RoundState, ThreadRef};
pub use state::{FileStateStore, MemoryStateStore, PluginState, StateError, StateStore};
pub use sync::{Deferred, DeferredError, Gate, GateGuard};
