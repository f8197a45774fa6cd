//! 1日1文字クイズ: a question revealed one character a day, answered by slash command.
//!
//! Registered games wait in a queue. Each morning one more is started, chosen so that
//! authors take turns, and every running game reveals its next character. A game closes
//! after three correct answers, or the day after its last character was revealed.

pub mod answer;
pub mod reveal;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quizbot_core::config::ChannelsConfig;
use quizbot_core::{Gate, PluginState, StateStore};
use quizbot_slack::events::split_command_text;
use quizbot_slack::{
    BotIdentity, EventContext, EventHandlerError, MessageBuilder, MessagePayload,
    MessageTemplate, PostedMessage, SlashCommandPayload, SlashCommandService,
};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use self::answer::{
    is_valid_answer, is_valid_ruby, ruby_matches, sanitize_answer, AnswerRejection,
    RegistrationError, MAX_CORRECT_ANSWERS,
};
use self::reveal::{
    is_valid_question, masked_question, progress_of_complete, revealed_part, uses_tokens,
    visible_text,
};
use crate::context::GameContext;
use crate::error::QuizError;

pub const GAME: &str = "slow-quiz";
pub const STATE_KEY: &str = "slow-quiz";
pub const COMMAND: &str = "/slow-quiz";
const STATUS_TITLE: &str = "現在開催中の1日1文字クイズ一覧";
const USAGE: &str = "使い方:\n\
    `/slow-quiz status` 開催中の問題を表示\n\
    `/slow-quiz register 問題文 | 答え | よみがな [| ジャンル [| ヒント]]` 問題を登録\n\
    `/slow-quiz answer [ID] よみがな` 解答";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Waitlisted,
    InProgress,
    Finished,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Genre {
    #[default]
    Normal,
    Strange,
    Anything,
}

impl Genre {
    pub fn label(self) -> &'static str {
        match self {
            Self::Normal => "正統派",
            Self::Strange => "変化球",
            Self::Anything => "なんでも",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.trim() {
            "normal" | "正統派" => Some(Self::Normal),
            "strange" | "変化球" => Some(Self::Strange),
            "anything" | "なんでも" => Some(Self::Anything),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub user: String,
    pub progress: usize,
    pub days: u32,
    pub date: DateTime<Utc>,
    pub answer: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Game {
    pub id: String,
    pub status: GameStatus,
    pub author: String,
    pub question: String,
    pub answer: String,
    pub ruby: String,
    #[serde(default)]
    pub hint: Option<String>,
    #[serde(default)]
    pub genre: Genre,
    pub registration_date: DateTime<Utc>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finish_date: Option<DateTime<Utc>>,
    pub progress: usize,
    pub progress_of_complete: usize,
    pub completed: bool,
    pub days: u32,
    #[serde(default)]
    pub correct_answers: Vec<Submission>,
    #[serde(default)]
    pub wrong_answers: Vec<Submission>,
    /// Cleared every morning; holds `bot:<id>` for bot answerers.
    #[serde(default)]
    pub answered_users: Vec<String>,
}

impl Game {
    pub fn masked_question(&self) -> String {
        masked_question(&self.question, self.progress)
    }

    fn is_open(&self) -> bool {
        self.status == GameStatus::InProgress && self.correct_answers.len() < MAX_CORRECT_ANSWERS
    }

    fn should_finish(&self) -> bool {
        self.correct_answers.len() >= MAX_CORRECT_ANSWERS
            || (self.completed && self.progress > self.progress_of_complete)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub channel: String,
    pub ts: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlowQuizState {
    #[serde(default)]
    pub games: Vec<Game>,
    /// Status posts refreshed in place whenever an answer comes in.
    #[serde(default)]
    pub latest_status_messages: Vec<StatusMessage>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    pub question: String,
    pub answer: String,
    pub ruby: String,
    pub genre: Genre,
    pub hint: Option<String>,
}

impl Registration {
    /// Parses `問題文 | 答え | よみがな [| ジャンル [| ヒント]]`.
    pub fn parse(text: &str) -> Result<Self, RegistrationError> {
        let fields: Vec<&str> = text.split('|').map(str::trim).collect();
        if fields.len() < 3 || fields.len() > 5 {
            return Err(RegistrationError::Format);
        }
        let genre = match fields.get(3).filter(|genre| !genre.is_empty()) {
            Some(genre) => Genre::parse(genre).ok_or(RegistrationError::UnknownGenre)?,
            None => Genre::default(),
        };
        let registration = Self {
            question: fields[0].to_string(),
            answer: fields[1].to_string(),
            ruby: fields[2].to_string(),
            genre,
            hint: fields.get(4).filter(|hint| !hint.is_empty()).map(|hint| hint.to_string()),
        };
        registration.validate()?;
        Ok(registration)
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        if self.question.is_empty() {
            return Err(RegistrationError::MissingQuestion);
        }
        if self.answer.is_empty() {
            return Err(RegistrationError::MissingAnswer);
        }
        if !is_valid_ruby(&self.ruby) {
            return Err(RegistrationError::InvalidRuby);
        }
        if !is_valid_question(&self.question) {
            return Err(RegistrationError::QuestionTooLong);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Answerer {
    User(String),
    Bot(String),
}

impl Answerer {
    fn key(&self) -> String {
        match self {
            Self::User(user) => user.clone(),
            Self::Bot(id) => format!("bot:{id}"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AnswerOutcome {
    Correct,
    Wrong,
}

impl AnswerOutcome {
    pub fn reply(self) -> &'static str {
        match self {
            Self::Correct => "正解です🎉🎉🎉",
            Self::Wrong => "残念！🙄",
        }
    }
}

#[derive(Debug, Error)]
pub enum SlowQuizError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),
    #[error(transparent)]
    Rejected(#[from] AnswerRejection),
    #[error(transparent)]
    Quiz(#[from] QuizError),
}

impl From<quizbot_core::StateError> for SlowQuizError {
    fn from(value: quizbot_core::StateError) -> Self {
        Self::Quiz(value.into())
    }
}

/// A non-human contestant that tries every running game once a day.
#[async_trait]
pub trait BotAnswerer: Send + Sync {
    fn id(&self) -> &str;

    /// `revealed` is the visible part of the question, `remaining` the number of
    /// characters still hidden. `None` passes.
    async fn answer(&self, revealed: &str, remaining: usize) -> Result<Option<String>, QuizError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlowQuizChannels {
    /// Receives short notices such as new registrations and correct answers.
    pub sandbox: String,
    pub quiz: String,
}

impl SlowQuizChannels {
    pub fn from_config(config: &ChannelsConfig) -> Self {
        Self { sandbox: config.sandbox.clone(), quiz: config.quiz.clone() }
    }

    fn status(&self) -> Vec<String> {
        let mut channels = vec![self.sandbox.clone()];
        if !self.quiz.is_empty() && self.quiz != self.sandbox {
            channels.push(self.quiz.clone());
        }
        channels
    }
}

/// Side effects of a state change, applied once the state is persisted.
#[derive(Default)]
struct Effects {
    increments: Vec<(String, &'static str)>,
    notices: Vec<MessageTemplate>,
    finished: Vec<Game>,
}

fn mention(user: &str) -> String {
    match user.strip_prefix("bot:") {
        Some(bot) => format!("*{bot}*"),
        None => format!("<@{user}>"),
    }
}

/// The next waitlisted game: authors never chosen go first, then authors chosen least
/// recently. Within an author, the oldest registration wins.
pub fn choose_new_game(games: &[Game]) -> Option<usize> {
    let mut started: Vec<&Game> =
        games.iter().filter(|game| game.status != GameStatus::Waitlisted).collect();
    started.sort_by(|a, b| b.start_date.cmp(&a.start_date));
    let mut recent_authors: Vec<&str> = Vec::new();
    for game in started {
        if !recent_authors.contains(&game.author.as_str()) {
            recent_authors.push(&game.author);
        }
    }

    let oldest_waitlisted = |accept: &dyn Fn(&Game) -> bool| {
        games
            .iter()
            .enumerate()
            .filter(|(_, game)| game.status == GameStatus::Waitlisted && accept(game))
            .min_by_key(|(_, game)| game.registration_date)
            .map(|(index, _)| index)
    };

    oldest_waitlisted(&|game| !recent_authors.contains(&game.author.as_str())).or_else(|| {
        recent_authors
            .iter()
            .rev()
            .find_map(|author| oldest_waitlisted(&|game| game.author == *author))
    })
}

fn find_game<'a>(
    games: &'a mut [Game],
    id: Option<&str>,
) -> Result<&'a mut Game, AnswerRejection> {
    if let Some(id) = id {
        return games.iter_mut().find(|game| game.id == id).ok_or(AnswerRejection::NotFound);
    }
    let mut running = games.iter_mut().filter(|game| game.status == GameStatus::InProgress);
    match (running.next(), running.next()) {
        (Some(game), None) => Ok(game),
        (Some(_), Some(_)) => Err(AnswerRejection::Ambiguous),
        (None, _) => Err(AnswerRejection::NotFound),
    }
}

fn close_finished_games(state: &mut SlowQuizState, now: DateTime<Utc>, effects: &mut Effects) {
    for game in &mut state.games {
        if game.status == GameStatus::InProgress && game.should_finish() {
            game.status = GameStatus::Finished;
            game.finish_date = Some(now);
            effects.finished.push(game.clone());
        }
    }
}

fn apply_answer(
    state: &mut SlowQuizState,
    game_id: Option<&str>,
    answerer: &Answerer,
    text: &str,
    now: DateTime<Utc>,
    effects: &mut Effects,
) -> Result<AnswerOutcome, AnswerRejection> {
    let game = find_game(&mut state.games, game_id)?;
    let key = answerer.key();
    if matches!(answerer, Answerer::User(user) if *user == game.author) {
        return Err(AnswerRejection::Author);
    }
    if !game.is_open() {
        return Err(AnswerRejection::Closed);
    }
    if game.correct_answers.iter().any(|submission| submission.user == key) {
        return Err(AnswerRejection::AlreadyCorrect);
    }
    if game.answered_users.contains(&key) {
        return Err(AnswerRejection::AlreadyAnswered);
    }
    if !is_valid_answer(text) {
        return Err(AnswerRejection::InvalidRuby);
    }

    game.answered_users.push(key.clone());
    let submission = Submission {
        user: key.clone(),
        progress: game.progress,
        days: game.days,
        date: now,
        answer: text.to_string(),
    };

    if !ruby_matches(text, &game.ruby) {
        game.wrong_answers.push(submission);
        if let Answerer::User(user) = answerer {
            effects.increments.push((user.clone(), "slowquiz-wrong-answer"));
        }
        return Ok(AnswerOutcome::Wrong);
    }

    game.correct_answers.push(submission);
    let first = game.correct_answers.len() == 1;
    match answerer {
        Answerer::User(user) => {
            let mut counters = vec!["slowquiz-correct-answer"];
            if game.days == 1 {
                counters.push("slowquiz-correct-answer-first-letter");
                if game.genre == Genre::Normal && !uses_tokens(&game.question) {
                    counters.push("slowquiz-normal-correct-answer-first-letter");
                }
            }
            if game.days <= 3 {
                counters.push("slowquiz-correct-answer-le-third-letter");
            }
            if first {
                counters.push("slowquiz-first-correct-answer");
            }
            effects.increments.extend(counters.into_iter().map(|counter| (user.clone(), counter)));
        }
        Answerer::Bot(_) => {
            effects.increments.push((game.author.clone(), "slowquiz-correct-answer-by-bot"));
            if first {
                effects
                    .increments
                    .push((game.author.clone(), "slowquiz-first-correct-answer-by-bot"));
            }
        }
    }

    let headline = format!("{}が1日1文字クイズに正解しました🎉🎉🎉", mention(&key));
    effects.notices.push(
        MessageBuilder::new(headline.clone())
            .section("slow-quiz-correct", |section| {
                section.mrkdwn(headline);
            })
            .context("slow-quiz-correct-question", |context| {
                context.plain(game.masked_question());
            })
            .build(),
    );

    close_finished_games(state, now, effects);
    Ok(AnswerOutcome::Correct)
}

fn advance_games(
    state: &mut SlowQuizState,
    brackets: &Regex,
    now: DateTime<Utc>,
    effects: &mut Effects,
) -> Option<String> {
    let started = choose_new_game(&state.games).map(|index| {
        let game = &mut state.games[index];
        game.status = GameStatus::InProgress;
        game.start_date = Some(now);
        game.id.clone()
    });

    for game in &mut state.games {
        if game.status == GameStatus::InProgress {
            game.progress += 1;
            game.days += 1;

            let visible = visible_text(&game.question, game.progress);
            let mut buffer = [0; 4];
            let ends_with_bracket = visible
                .text
                .chars()
                .last()
                .is_some_and(|ch| brackets.is_match(ch.encode_utf8(&mut buffer)));
            if ends_with_bracket {
                game.progress += 1;
            }

            if game.progress >= game.progress_of_complete && !game.completed {
                game.completed = true;
                if !game.correct_answers.is_empty() {
                    effects.increments.push((game.author.clone(), "slowquiz-complete-quiz"));
                }
            }
        }
        game.answered_users.clear();
    }

    close_finished_games(state, now, effects);
    started
}

fn status_message(games: &[Game]) -> MessageTemplate {
    let mut running: Vec<&Game> =
        games.iter().filter(|game| game.status == GameStatus::InProgress).collect();
    running.sort_by_key(|game| game.start_date);

    let mut builder = MessageBuilder::new(STATUS_TITLE);
    if running.is_empty() {
        return builder
            .section("slow-quiz-empty", |section| {
                section.plain("現在開催中の1日1文字クイズはないよ！");
            })
            .build();
    }
    for game in running {
        builder = builder
            .section(format!("slow-quiz-question-{}", game.id), |section| {
                section.mrkdwn(format!("＊Q. {}＊", game.masked_question()));
            })
            .context(format!("slow-quiz-summary-{}", game.id), |context| {
                context.mrkdwn(format!(
                    "{} さんの問題 / 【{}】 / 本日{}人解答 / {}人正解済み / ID: `{}`",
                    mention(&game.author),
                    game.genre.label(),
                    game.answered_users.len(),
                    game.correct_answers.len(),
                    game.id,
                ));
            });
    }
    builder.build()
}

fn finish_message(game: &Game) -> MessageTemplate {
    let mut summary = format!(
        "＊Q. {}＊\n\n＊A. {} ({})＊\n\n出題者: {}",
        game.question,
        game.answer,
        game.ruby,
        mention(&game.author)
    );
    if let Some(hint) = &game.hint {
        summary.push_str(&format!("\nヒント: {hint}"));
    }

    let mut builder = MessageBuilder::new("1日1文字クイズの解答受付が終了しました")
        .section("slow-quiz-finished", |section| {
            section.mrkdwn("*～解答受付終了～*");
        })
        .section("slow-quiz-finished-summary", |section| {
            section.mrkdwn(summary);
        })
        .section("slow-quiz-finished-ranking", |section| {
            section.mrkdwn("*正解者一覧*");
        });
    if game.correct_answers.is_empty() {
        builder = builder.context("slow-quiz-finished-none", |context| {
            context.plain("正解者なし");
        });
    }
    for (rank, submission) in game.correct_answers.iter().enumerate() {
        builder = builder.context(format!("slow-quiz-finished-{rank}"), |context| {
            context.mrkdwn(format!(
                "*{}位* {} ({}文字)",
                rank + 1,
                mention(&submission.user),
                submission.progress
            ));
        });
    }
    builder.build()
}

fn new_game_id<R: Rng + ?Sized>(games: &[Game], rng: &mut R) -> String {
    loop {
        let id = rng.gen_range(0..10_000_000_000_u64).to_string();
        if games.iter().all(|game| game.id != id) {
            return id;
        }
    }
}

pub struct SlowQuiz {
    ctx: GameContext,
    state: PluginState<SlowQuizState>,
    gate: Gate,
    channels: SlowQuizChannels,
    bots: Vec<Arc<dyn BotAnswerer>>,
    brackets: Regex,
}

impl SlowQuiz {
    pub async fn new(
        ctx: GameContext,
        store: Arc<dyn StateStore>,
        channels: SlowQuizChannels,
    ) -> Result<Self, QuizError> {
        Ok(Self {
            ctx,
            state: PluginState::load(store, STATE_KEY).await?,
            gate: Gate::new(),
            channels,
            bots: Vec::new(),
            brackets: Regex::new(r"^[\p{Ps}\p{Pe}]$")?,
        })
    }

    pub fn with_bot(mut self, bot: Arc<dyn BotAnswerer>) -> Self {
        self.bots.push(bot);
        self
    }

    pub fn identity() -> BotIdentity {
        BotIdentity::new("1日1文字クイズ", ":face_with_rolling_eyes:")
    }

    pub async fn games(&self) -> Vec<Game> {
        self.state.read(|state| state.games.clone()).await
    }

    /// Queues a new game and returns its id.
    pub async fn register(
        &self,
        author: &str,
        registration: Registration,
    ) -> Result<String, SlowQuizError> {
        registration.validate()?;
        self.gate
            .run_exclusive(|| async {
                let now = Utc::now();
                let id = self
                    .state
                    .mutate(|state| {
                        let id = new_game_id(&state.games, &mut rand::thread_rng());
                        state.games.push(Game {
                            id: id.clone(),
                            status: GameStatus::Waitlisted,
                            author: author.to_string(),
                            progress_of_complete: progress_of_complete(&registration.question),
                            question: registration.question,
                            answer: registration.answer,
                            ruby: registration.ruby,
                            hint: registration.hint,
                            genre: registration.genre,
                            registration_date: now,
                            start_date: None,
                            finish_date: None,
                            progress: 0,
                            completed: false,
                            days: 0,
                            correct_answers: Vec::new(),
                            wrong_answers: Vec::new(),
                            answered_users: Vec::new(),
                        });
                        id
                    })
                    .await?;
                info!(
                    event_name = "slow_quiz.registered",
                    game = GAME,
                    game_id = %id,
                    user_id = %author,
                    "slow quiz game registered"
                );

                let notice = format!("{}が1日1文字クイズの問題を登録したよ💪", mention(author));
                let effects = Effects {
                    increments: vec![(author.to_string(), "slowquiz-register-quiz")],
                    notices: vec![MessageBuilder::new(notice).build()],
                    finished: Vec::new(),
                };
                self.apply(effects).await?;
                Ok::<_, SlowQuizError>(id)
            })
            .await
    }

    /// Judges `text` against a running game. Without `game_id` the only running game is
    /// meant.
    pub async fn answer(
        &self,
        user: &str,
        game_id: Option<&str>,
        text: &str,
    ) -> Result<AnswerOutcome, SlowQuizError> {
        let answerer = Answerer::User(user.to_string());
        self.gate.run_exclusive(|| self.submit(&answerer, game_id, text)).await
    }

    async fn submit(
        &self,
        answerer: &Answerer,
        game_id: Option<&str>,
        text: &str,
    ) -> Result<AnswerOutcome, SlowQuizError> {
        let mut effects = Effects::default();
        let outcome = self
            .state
            .mutate(|state| {
                apply_answer(state, game_id, answerer, text, Utc::now(), &mut effects)
            })
            .await??;
        let correct = outcome == AnswerOutcome::Correct;
        info!(
            event_name = "slow_quiz.answered",
            game = GAME,
            user_id = %answerer.key(),
            correct,
            "slow quiz answer judged"
        );
        self.apply(effects).await?;
        self.refresh_status_messages().await;
        Ok(outcome)
    }

    /// The daily step: start the next game, reveal one more character of every running
    /// game, close finished games, then let the bots answer.
    pub async fn progress_games(&self) -> Result<(), QuizError> {
        self.gate
            .run_exclusive(|| async {
                let mut effects = Effects::default();
                let started = self
                    .state
                    .mutate(|state| {
                        advance_games(state, &self.brackets, Utc::now(), &mut effects)
                    })
                    .await?;
                if let Some(game_id) = &started {
                    info!(
                        event_name = "slow_quiz.started",
                        game = GAME,
                        game_id = %game_id,
                        "slow quiz game started"
                    );
                }
                self.apply(effects).await?;

                let running = self
                    .state
                    .read(|state| {
                        state.games.iter().any(|game| game.status == GameStatus::InProgress)
                    })
                    .await;
                if running {
                    self.post_status_to(&self.channels.status(), true).await?;
                }
                self.run_bots().await
            })
            .await
    }

    /// Posts the list of running games to `channels` and remembers the posts for later
    /// refreshes.
    pub async fn post_status(&self, channels: &[String]) -> Result<(), QuizError> {
        self.gate.run_exclusive(|| self.post_status_to(channels, false)).await
    }

    async fn post_status_to(&self, channels: &[String], replace: bool) -> Result<(), QuizError> {
        let template = self.state.read(|state| status_message(&state.games)).await;
        let mut posted = Vec::new();
        for channel in channels {
            if let Some(message) = self.post(channel, template.clone()).await {
                posted.push(StatusMessage { channel: message.channel, ts: message.ts });
            }
        }
        self.state
            .mutate(|state| {
                if replace {
                    state.latest_status_messages = posted;
                } else {
                    state.latest_status_messages.extend(posted);
                }
            })
            .await?;
        Ok(())
    }

    async fn refresh_status_messages(&self) {
        let (template, messages) = self
            .state
            .read(|state| (status_message(&state.games), state.latest_status_messages.clone()))
            .await;
        for message in messages {
            let payload = MessagePayload::from_template(&message.channel, template.clone())
                .with_identity(&Self::identity());
            if let Err(error) = self.ctx.web.update_message(&message.ts, &payload).await {
                warn!(
                    event_name = "slow_quiz.status_update_failed",
                    game = GAME,
                    channel_id = %message.channel,
                    error = %error,
                    "could not refresh status message"
                );
            }
        }
    }

    async fn run_bots(&self) -> Result<(), QuizError> {
        let questions: Vec<(String, String, usize)> = self
            .state
            .read(|state| {
                state
                    .games
                    .iter()
                    .filter(|game| game.is_open())
                    .map(|game| {
                        let revealed = revealed_part(&game.masked_question()).to_string();
                        let remaining = game.progress_of_complete.saturating_sub(game.progress);
                        (game.id.clone(), revealed, remaining)
                    })
                    .collect()
            })
            .await;

        for bot in &self.bots {
            for (game_id, revealed, remaining) in &questions {
                let guess = match bot.answer(revealed, *remaining).await {
                    Ok(Some(guess)) => sanitize_answer(&guess),
                    Ok(None) => continue,
                    Err(error) => {
                        warn!(
                            event_name = "slow_quiz.bot_failed",
                            game = GAME,
                            bot = bot.id(),
                            error = %error,
                            "bot answerer failed"
                        );
                        continue;
                    }
                };
                if guess.is_empty() {
                    continue;
                }
                let answerer = Answerer::Bot(bot.id().to_string());
                match self.submit(&answerer, Some(game_id), &guess).await {
                    Err(SlowQuizError::Quiz(error)) => return Err(error),
                    Ok(_) | Err(SlowQuizError::Rejected(_) | SlowQuizError::Registration(_)) => {}
                }
            }
        }
        Ok(())
    }

    async fn apply(&self, effects: Effects) -> Result<(), QuizError> {
        for (user, counter) in &effects.increments {
            self.ctx.ledger.increment(user, counter, 1).await?;
        }
        for notice in effects.notices {
            self.post(&self.channels.sandbox, notice).await;
        }
        for game in &effects.finished {
            info!(
                event_name = "slow_quiz.finished",
                game = GAME,
                game_id = %game.id,
                correct_answers = game.correct_answers.len(),
                "slow quiz game finished"
            );
            let template = finish_message(game);
            for channel in self.channels.status() {
                self.post(&channel, template.clone()).await;
            }
        }
        Ok(())
    }

    async fn post(&self, channel: &str, template: MessageTemplate) -> Option<PostedMessage> {
        let payload =
            MessagePayload::from_template(channel, template).with_identity(&Self::identity());
        match self.ctx.web.post_message(&payload).await {
            Ok(posted) => Some(posted),
            Err(error) => {
                warn!(
                    event_name = "slow_quiz.post_failed",
                    game = GAME,
                    channel_id = %channel,
                    error = %error,
                    "could not post slow quiz message"
                );
                None
            }
        }
    }

    async fn command_reply(&self, payload: &SlashCommandPayload) -> Result<String, SlowQuizError> {
        let (verb, rest) = split_command_text(&payload.text);
        match verb.as_str() {
            "" | "status" => {
                self.post_status(&[payload.channel_id.clone()]).await?;
                Ok("Working...".to_string())
            }
            "register" => {
                let id = self.register(&payload.user_id, Registration::parse(&rest)?).await?;
                Ok(format!("1日1文字クイズの問題を登録したよ💪 (ID: {id})"))
            }
            "answer" => {
                let (game_id, text) = match rest.split_once(char::is_whitespace) {
                    Some((id, text)) => (Some(id), text.trim()),
                    None => (None, rest.as_str()),
                };
                let outcome = self.answer(&payload.user_id, game_id, text).await?;
                Ok(outcome.reply().to_string())
            }
            _ => Ok(USAGE.to_string()),
        }
    }
}

#[async_trait]
impl SlashCommandService for SlowQuiz {
    fn command(&self) -> &str {
        COMMAND
    }

    async fn handle_command(
        &self,
        payload: &SlashCommandPayload,
        ctx: &EventContext,
    ) -> Result<MessageTemplate, EventHandlerError> {
        let reply = match self.command_reply(payload).await {
            Ok(reply) => reply,
            Err(SlowQuizError::Registration(error)) => error.to_string(),
            Err(SlowQuizError::Rejected(error)) => error.to_string(),
            Err(SlowQuizError::Quiz(error)) => {
                warn!(
                    event_name = "slow_quiz.command_failed",
                    game = GAME,
                    correlation_id = %ctx.correlation_id,
                    user_id = %payload.user_id,
                    error = %error,
                    "slow quiz command failed"
                );
                return Err(EventHandlerError::Command(error.to_string()));
            }
        };
        Ok(MessageBuilder::new(reply.clone())
            .section("slow-quiz-reply", |section| {
                section.mrkdwn(reply);
            })
            .build())
    }
}
