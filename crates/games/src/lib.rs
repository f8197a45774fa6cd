//! Quiz games for the bot
//!
//! - **Engine** (`atequiz`) - problem model, hint schedule, exactly-one-winner rounds
//! - **Sessions** (`session`) - one round per wake word, behind the channel gate
//! - **Adapters** - `achievement_quiz`, `character_quiz`, `qrcode_quiz`, `ricochet`
//! - **Slow quiz** (`slow_quiz`) - multi-day reveal game driven by a slash command and a
//!   daily tick
//! - **Content** (`content`) - traits for the external sources adapters draw from

pub mod achievement_quiz;
pub mod atequiz;
pub mod character_quiz;
pub mod content;
pub mod context;
pub mod error;
pub mod qrcode_quiz;
pub mod ricochet;
pub mod session;
pub mod slow_quiz;
#[cfg(test)]
mod testing;

pub use achievement_quiz::AchievementQuiz;
pub use atequiz::{AteQuiz, QuizHandle, QuizOutcome, QuizProblem, QuizRules, Verdict};
pub use character_quiz::CharacterQuiz;
pub use context::{GameContext, QuizSettings};
pub use error::QuizError;
pub use qrcode_quiz::QrcodeQuiz;
pub use ricochet::RicochetRobots;
pub use slow_quiz::{BotAnswerer, SlowQuiz, SlowQuizChannels};
