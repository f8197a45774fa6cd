//! Generic timed quiz: one problem, staged hints, first correct reply in the thread wins.

pub mod engine;
pub mod problem;
pub mod rules;

pub use engine::{AteQuiz, QuizHandle, QuizOutcome, StartMode, DEFAULT_TICK};
pub use problem::{fill_winner, typical, QuizProblem, TYPICAL_HINT_TEXTS, WINNER_PLACEHOLDER};
pub use rules::{HintTiming, QuizRules, StandardRules, Verdict};
