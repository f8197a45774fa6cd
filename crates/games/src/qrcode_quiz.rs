//! QR当てクイズ: read a QR code with your eyes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::Gate;
use quizbot_slack::{
    MessageBuilder, MessageEvent, MessagePayload, WakeError, WakeResponse, WakeWordHandler,
};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::atequiz::{typical, AteQuiz, QuizOutcome, QuizProblem, QuizRules, StartMode};
use crate::content::{DictionaryWord, Loader, QrRenderer, WordSource};
use crate::context::GameContext;
use crate::error::QuizError;
use crate::session::{launch, RoundTicket};

pub const GAME: &str = "qrcode-quiz";
const WAKE_WORD: &str = "QR当てクイズ";
const STANDARD_RULE_URL: &str =
    "https://scrapbox.io/tsg/QR%E5%BD%93%E3%81%A6%E3%82%AF%E3%82%A4%E3%82%BA%2F%E6%A8%99%E6%BA%96%E3%83%AB%E3%83%BC%E3%83%AB";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum QrDifficulty {
    #[default]
    Easy,
    Normal,
    Hard,
}

impl QrDifficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Normal => "normal",
            Self::Hard => "hard",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum QrMode {
    Alphabet,
    Hiragana,
    Numeric,
    Kanji,
    #[default]
    Random,
}

impl QrMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Alphabet => "alphabet",
            Self::Hiragana => "hiragana",
            Self::Numeric => "numeric",
            Self::Kanji => "kanji",
            Self::Random => "random",
        }
    }

    /// Resolves `Random` to a concrete mode; the pool widens with difficulty.
    pub fn resolve(self, difficulty: QrDifficulty, rng: &mut impl Rng) -> QrMode {
        if self != Self::Random {
            return self;
        }
        let pool: &[QrMode] = match difficulty {
            QrDifficulty::Easy => &[Self::Alphabet, Self::Hiragana],
            QrDifficulty::Normal => &[Self::Alphabet, Self::Hiragana, Self::Numeric],
            QrDifficulty::Hard => &[Self::Alphabet, Self::Hiragana, Self::Numeric, Self::Kanji],
        };
        pool.choose(rng).copied().unwrap_or(Self::Alphabet)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QrOptions {
    pub unmasked: bool,
    pub difficulty: QrDifficulty,
    pub mode: QrMode,
}

/// Whitespace separated, case-insensitive; the last option of a kind wins.
pub fn parse_options(text: &str) -> QrOptions {
    let mut options = QrOptions::default();
    for token in text.split_whitespace().map(str::to_lowercase) {
        match token.as_str() {
            "unmasked" => options.unmasked = true,
            "easy" => options.difficulty = QrDifficulty::Easy,
            "normal" => options.difficulty = QrDifficulty::Normal,
            "hard" => options.difficulty = QrDifficulty::Hard,
            "numeric" => options.mode = QrMode::Numeric,
            "alphabet" => options.mode = QrMode::Alphabet,
            "hiragana" => options.mode = QrMode::Hiragana,
            "kanji" => options.mode = QrMode::Kanji,
            "random" => options.mode = QrMode::Random,
            _ => {}
        }
    }
    options
}

fn pick(candidates: Vec<&str>, rng: &mut impl Rng, what: &str) -> Result<String, QuizError> {
    candidates
        .choose(rng)
        .map(|word| word.to_string())
        .ok_or_else(|| QuizError::content(format!("no {what} words available")))
}

/// English words are ranked by frequency, so easier levels sample from the head of the list.
pub fn alphabet_text(
    words: &[String],
    difficulty: QrDifficulty,
    rng: &mut impl Rng,
) -> Result<String, QuizError> {
    let (head, lengths) = match difficulty {
        QrDifficulty::Easy => (1000, 3..=4),
        QrDifficulty::Normal => (2000, 5..=8),
        QrDifficulty::Hard => (8000, 9..=usize::MAX),
    };
    let candidates = words
        .iter()
        .take(head)
        .filter(|word| lengths.contains(&word.chars().count()))
        .map(String::as_str)
        .collect();
    pick(candidates, rng, "alphabet").map(|word| word.to_uppercase())
}

pub fn hiragana_text(
    words: &[DictionaryWord],
    difficulty: QrDifficulty,
    rng: &mut impl Rng,
) -> Result<String, QuizError> {
    let lengths = match difficulty {
        QrDifficulty::Easy => 2..=2,
        QrDifficulty::Normal => 3..=6,
        QrDifficulty::Hard => 7..=10,
    };
    let candidates = words
        .iter()
        .map(|word| word.ruby.as_str())
        .filter(|ruby| lengths.contains(&ruby.chars().count()))
        .collect();
    pick(candidates, rng, "hiragana")
}

fn is_kanji(ch: char) -> bool {
    ('一'..='龠').contains(&ch)
}

pub fn kanji_text(
    words: &[DictionaryWord],
    difficulty: QrDifficulty,
    rng: &mut impl Rng,
) -> Result<String, QuizError> {
    let lengths = match difficulty {
        QrDifficulty::Easy => 1..=1,
        QrDifficulty::Normal => 2..=2,
        QrDifficulty::Hard => 3..=10,
    };
    let candidates = words
        .iter()
        .map(|word| word.word.as_str())
        .filter(|word| !word.is_empty() && word.chars().all(is_kanji))
        .filter(|word| lengths.contains(&word.chars().count()))
        .collect();
    pick(candidates, rng, "kanji")
}

pub fn numeric_text(difficulty: QrDifficulty, rng: &mut impl Rng) -> String {
    match difficulty {
        QrDifficulty::Easy => rng.gen_range(0..=999u32).to_string(),
        QrDifficulty::Normal => rng.gen_range(1_000_000..=999_999_999u32).to_string(),
        QrDifficulty::Hard => (0..40).map(|_| char::from(b'0' + rng.gen_range(0..=9u8))).collect(),
    }
}

/// `M分S.S秒`, or `S.S秒` under a minute.
pub fn format_duration(elapsed: Duration) -> String {
    let total = elapsed.as_secs_f64();
    let minutes = (total / 60.0).floor();
    let seconds = total - minutes * 60.0;
    if minutes > 0.0 {
        format!("{minutes:.0}分{seconds:.1}秒")
    } else {
        format!("{seconds:.1}秒")
    }
}

/// One fixed wait with no hints; the solved message reports how long it took.
#[derive(Clone, Debug)]
pub struct QrRules {
    pub time_limit: Duration,
}

impl Default for QrRules {
    fn default() -> Self {
        Self { time_limit: Duration::from_secs(300) }
    }
}

#[async_trait]
impl QuizRules for QrRules {
    fn wait(&self, _hint_index: usize, _hint_count: usize) -> Option<Duration> {
        Some(self.time_limit)
    }

    async fn solved_message(
        &self,
        problem: &QuizProblem,
        winner: &MessageEvent,
        elapsed: Duration,
    ) -> Result<MessagePayload, QuizError> {
        let data = problem.correct_answers.first().map(String::as_str).unwrap_or_default();
        let mut message = problem.solved_message.clone();
        message.text = format!(
            "<@{}> 正解:tada: 答えは ＊{data}＊ だよ:muscle:\n回答時間: {}",
            winner.user(),
            format_duration(elapsed)
        );
        Ok(message)
    }
}

pub fn build_problem(
    channel: &str,
    options: &QrOptions,
    data: &str,
    quiz_image: &str,
    original_image: &str,
    time_limit: Duration,
) -> QuizProblem {
    let quiz_text = format!(
        "このQRコード、なんと書いてあるでしょう? \
         (difficulty = {}, mode = {}, masked = {}) <{STANDARD_RULE_URL}|[標準ルール]>",
        options.difficulty.as_str(),
        options.mode.as_str(),
        !options.unmasked,
    );
    let problem = MessageBuilder::new(quiz_text.clone())
        .section("qrcode.problem", |section| {
            section.mrkdwn(quiz_text).image(quiz_image, "QRコード");
        })
        .build();

    let limit_text = format!("{}秒以内に回答してね！", time_limit.as_secs());
    let immediate = MessageBuilder::new(limit_text.clone())
        .section("qrcode.limit", |section| {
            section.plain(limit_text);
        })
        .image("qrcode.image", quiz_image, "QRコード")
        .build();
    let answer =
        MessageBuilder::new("QRコード").image("qrcode.original", original_image, data).build();

    QuizProblem::new(
        MessagePayload::from_template(channel, problem),
        MessagePayload::text(channel, ""),
        MessagePayload::text(channel, typical::unsolved(&format!(" ＊{data}＊ "))),
        vec![data.to_string(), data.to_lowercase()],
    )
    .with_immediate(MessagePayload::from_template(channel, immediate))
    .with_answer(MessagePayload::from_template(channel, answer))
}

pub fn answer_counters(options: &QrOptions, mode: QrMode, elapsed: Duration) -> Vec<String> {
    if options.unmasked {
        return vec!["qrcode-quiz-answer-unmasked".to_string()];
    }
    let mut counters =
        vec!["qrcode-quiz-answer".to_string(), format!("qrcode-quiz-answer-{}", mode.as_str())];
    for level in [QrDifficulty::Easy, QrDifficulty::Normal, QrDifficulty::Hard] {
        if options.difficulty >= level {
            counters.push(format!("qrcode-quiz-answer-{}-or-above", level.as_str()));
        }
    }
    for seconds in [10, 30, 45, 150] {
        if elapsed < Duration::from_secs(seconds) {
            counters.push(format!("qrcode-quiz-answer-less-than-{seconds}s"));
        }
    }
    counters
}

struct Shared {
    ctx: GameContext,
    words: Arc<dyn WordSource>,
    renderer: Arc<dyn QrRenderer>,
    english: Loader<Vec<String>>,
    japanese: Loader<Vec<DictionaryWord>>,
    rules: QrRules,
}

impl Shared {
    async fn generate(&self, options: &QrOptions) -> Result<(QrMode, String), QuizError> {
        let mode = options.mode.resolve(options.difficulty, &mut rand::thread_rng());
        let data = match mode {
            QrMode::Alphabet => {
                let words = self.english.load(|| self.words.english_words()).await?;
                alphabet_text(&words, options.difficulty, &mut rand::thread_rng())?
            }
            QrMode::Hiragana => {
                let words = self.japanese.load(|| self.words.japanese_words()).await?;
                hiragana_text(&words, options.difficulty, &mut rand::thread_rng())?
            }
            QrMode::Kanji => {
                let words = self.japanese.load(|| self.words.japanese_words()).await?;
                kanji_text(&words, options.difficulty, &mut rand::thread_rng())?
            }
            QrMode::Numeric | QrMode::Random => {
                numeric_text(options.difficulty, &mut rand::thread_rng())
            }
        };
        Ok((mode, data))
    }
}

pub struct QrcodeQuiz {
    shared: Arc<Shared>,
    gate: Gate,
    wake_word: Regex,
}

impl QrcodeQuiz {
    pub fn new(
        ctx: GameContext,
        words: Arc<dyn WordSource>,
        renderer: Arc<dyn QrRenderer>,
    ) -> Result<Self, QuizError> {
        Ok(Self {
            shared: Arc::new(Shared {
                ctx,
                words,
                renderer,
                english: Loader::new(),
                japanese: Loader::new(),
                rules: QrRules::default(),
            }),
            gate: Gate::new(),
            wake_word: Regex::new(&format!("^{WAKE_WORD}"))?,
        })
    }

    pub fn start_round(
        &self,
        options: QrOptions,
        channel: &str,
    ) -> Option<(RoundTicket, JoinHandle<()>)> {
        let guard = self.gate.try_acquire()?;
        let shared = Arc::clone(&self.shared);
        let channel_owned = channel.to_string();

        Some(launch(Arc::clone(&self.shared.ctx.web), GAME, channel, move |started| async move {
            let _guard = guard;
            let (mode, data) = shared.generate(&options).await?;
            let images = shared.renderer.render(&data, options.unmasked).await?;
            let problem = build_problem(
                &channel_owned,
                &options,
                &data,
                &images.quiz,
                &images.original,
                shared.rules.time_limit,
            );
            let rules = shared.rules.clone();
            let web = Arc::clone(&shared.ctx.web);
            let outcome = AteQuiz::new(web, shared.ctx.bus.clone(), problem, rules)
                .with_tick(shared.ctx.settings.tick)
                .with_started(started)
                .start(StartMode::Normal)
                .await?;
            record(&shared.ctx, &options, mode, &outcome).await
        }))
    }
}

async fn record(
    ctx: &GameContext,
    options: &QrOptions,
    mode: QrMode,
    outcome: &QuizOutcome,
) -> Result<(), QuizError> {
    let Some(winner) = outcome.correct_answerer.as_deref() else {
        return Ok(());
    };
    ctx.increment_all(winner, &answer_counters(options, mode, outcome.elapsed)).await?;
    info!(
        event_name = "quiz.achievements.recorded",
        game = GAME,
        user_id = winner,
        elapsed_ms = outcome.elapsed.as_millis() as u64,
        "achievements recorded"
    );
    Ok(())
}

#[async_trait]
impl WakeWordHandler for QrcodeQuiz {
    fn name(&self) -> &str {
        GAME
    }

    fn wake_word(&self) -> &Regex {
        &self.wake_word
    }

    async fn on_wake_word(
        &self,
        message: &MessageEvent,
        channel: &str,
    ) -> Result<Option<WakeResponse>, WakeError> {
        let options = parse_options(message.text().trim_start_matches(WAKE_WORD));
        match self.start_round(options, channel) {
            Some((ticket, _join)) => Ok(ticket.wake_response().await),
            None => {
                self.shared.ctx.notify_busy(message).await;
                Ok(None)
            }
        }
    }
}
