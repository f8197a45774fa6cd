//! 実績当てクイズ: guess an achievement title from its unlock condition.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::{Achievement, AchievementCatalog, Difficulty, Gate};
use quizbot_slack::{
    BotIdentity, MessageEvent, MessagePayload, WakeError, WakeResponse, WakeWordHandler,
};
use rand::seq::SliceRandom;
use regex::Regex;
use tokio::task::JoinHandle;
use tracing::info;

use crate::atequiz::{AteQuiz, QuizOutcome, QuizProblem, QuizRules, StartMode};
use crate::context::GameContext;
use crate::error::QuizError;
use crate::session::{launch, RoundTicket};

pub const GAME: &str = "achievement-quiz";
const THIS_ACHIEVEMENT: &str = "achievement-quiz-clear-this-achievement";

/// The masked-title "hint" is the answer template, posted right away; then two minutes.
#[derive(Clone, Debug)]
pub struct AchievementRules {
    pub time_limit: Duration,
}

impl Default for AchievementRules {
    fn default() -> Self {
        Self { time_limit: Duration::from_secs(120) }
    }
}

#[async_trait]
impl QuizRules for AchievementRules {
    fn wait(&self, hint_index: usize, _hint_count: usize) -> Option<Duration> {
        if hint_index == 0 {
            Some(Duration::ZERO)
        } else {
            Some(self.time_limit)
        }
    }
}

/// First character kept, every later letter or digit replaced by `_`.
pub fn hide_title(title: &str) -> String {
    let mut chars = title.chars();
    let Some(first) = chars.next() else {
        return String::new();
    };
    std::iter::once(first)
        .chain(chars.map(|ch| if ch.is_alphanumeric() { '_' } else { ch }))
        .collect()
}

fn achievement_link(achievement: &Achievement) -> String {
    format!(
        "<https://achievements.tsg.ne.jp/achievements/{}|{}>",
        achievement.id, achievement.title
    )
}

pub fn build_problem(achievement: &Achievement, channel: &str) -> QuizProblem {
    let hidden = hide_title(&achievement.title);
    let problem_text = format!(
        "この実績なーんだ\n【{hidden}】（{}文字）\n>*解除条件*: {}\n>*解除難易度*: {} ({})\n解答はスレッドへ",
        achievement.title.chars().count(),
        achievement.condition,
        achievement.difficulty.stars(),
        achievement.difficulty.as_str(),
    );
    let link = achievement_link(achievement);

    QuizProblem::new(
        MessagePayload::text(channel, problem_text),
        MessagePayload::text(channel, format!("<@[[!user]]> 正解です:clap:\n答えは *{link}* だよ:laughing:"))
            .broadcast(),
        MessagePayload::text(channel, format!("正解者は出ませんでした:sob:\n答えは *{link}* だよ:cry:"))
            .broadcast(),
        vec![achievement.title.clone()],
    )
    .with_hints(vec![MessagePayload::text(channel, hidden)])
    .with_immediate(MessagePayload::text(channel, "制限時間は2分です。解答の雛形↓"))
}

/// Counters for a solved round; the self-referential achievement is unlocked separately.
pub fn clear_counters(achievement: &Achievement) -> Vec<String> {
    vec![
        "achievement-quiz-clear".to_string(),
        format!("achievement-quiz-clear-{}", achievement.difficulty.as_str()),
    ]
}

pub struct AchievementQuiz {
    ctx: GameContext,
    catalog: Arc<AchievementCatalog>,
    rules: AchievementRules,
    gate: Gate,
    wake_word: Regex,
}

impl AchievementQuiz {
    pub fn new(ctx: GameContext, catalog: Arc<AchievementCatalog>) -> Result<Self, QuizError> {
        Ok(Self {
            ctx,
            catalog,
            rules: AchievementRules::default(),
            gate: Gate::new(),
            wake_word: Regex::new("^実績当てクイズ$")?,
        })
    }

    pub fn identity() -> BotIdentity {
        BotIdentity::new("実績当てクイズ", ":achievement:")
    }

    fn pick(&self) -> Result<Achievement, QuizError> {
        let candidates: Vec<&Achievement> = self
            .catalog
            .iter()
            .filter(|achievement| achievement.difficulty != Difficulty::Baby)
            .collect();
        candidates
            .choose(&mut rand::thread_rng())
            .map(|achievement| (*achievement).clone())
            .ok_or_else(|| QuizError::content("achievement catalog has no quizzable entries"))
    }

    /// Starts a round for `answer` in `channel`; `None` when a round is already running.
    pub fn start_round(
        &self,
        answer: Achievement,
        channel: &str,
    ) -> Option<(RoundTicket, JoinHandle<()>)> {
        let guard = self.gate.try_acquire()?;
        let ctx = self.ctx.clone();
        let rules = self.rules.clone();
        let problem = build_problem(&answer, channel);

        Some(launch(Arc::clone(&self.ctx.web), GAME, channel, move |started| async move {
            let _guard = guard;
            let outcome = AteQuiz::new(Arc::clone(&ctx.web), ctx.bus.clone(), problem, rules)
                .with_identity(Self::identity())
                .with_tick(ctx.settings.tick)
                .with_started(started)
                .start(StartMode::Normal)
                .await?;
            record(&ctx, &answer, &outcome).await
        }))
    }
}

async fn record(
    ctx: &GameContext,
    answer: &Achievement,
    outcome: &QuizOutcome,
) -> Result<(), QuizError> {
    let Some(winner) = outcome.correct_answerer.as_deref() else {
        return Ok(());
    };
    ctx.increment_all(winner, &clear_counters(answer)).await?;
    if answer.id == THIS_ACHIEVEMENT {
        ctx.ledger.unlock(winner, THIS_ACHIEVEMENT).await?;
    }
    info!(
        event_name = "quiz.achievements.recorded",
        game = GAME,
        user_id = winner,
        "achievements recorded"
    );
    Ok(())
}

#[async_trait]
impl WakeWordHandler for AchievementQuiz {
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
        let answer = self.pick().map_err(|error| WakeError::Failed(error.to_string()))?;
        match self.start_round(answer, channel) {
            Some((ticket, _join)) => Ok(ticket.wake_response().await),
            None => {
                self.ctx.notify_busy(message).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quizbot_core::{Achievement, AchievementCatalog, Difficulty, RoundState};
    use quizbot_slack::WakeWordHandler;

    use super::{build_problem, hide_title, record, AchievementQuiz, AchievementRules};
    use crate::atequiz::{AteQuiz, StartMode};
    use crate::testing::{answer, wake, Harness};

    fn example() -> Achievement {
        Achievement {
            id: "example".to_string(),
            difficulty: Difficulty::Easy,
            title: "Example".to_string(),
            condition: "例を示す".to_string(),
            counter: None,
            value: None,
        }
    }

    fn quiz(harness: &Harness) -> AchievementQuiz {
        let catalog = AchievementCatalog::from_entries(vec![example()]).expect("catalog");
        AchievementQuiz::new(harness.ctx.clone(), Arc::new(catalog)).expect("quiz")
    }

    #[test]
    fn titles_keep_the_first_character_and_punctuation() {
        assert_eq!(hide_title("Example"), "E______");
        assert_eq!(hide_title("実績を10個解除する!"), "実_________!");
        assert_eq!(hide_title(""), "");
    }

    #[tokio::test(start_paused = true)]
    async fn solving_in_the_first_window_counts_clears() {
        let harness = Harness::new();
        let quiz = AteQuiz::new(
            harness.web.clone(),
            harness.ctx.bus.clone(),
            build_problem(&example(), "C1"),
            AchievementRules::default(),
        );
        let started = quiz.handle().started().clone();
        let round = tokio::spawn(quiz.start(StartMode::Normal));
        let posted = started.wait().await.expect("started");

        harness.publish(answer("C1", &posted.ts, "U1", "example"));
        let outcome = round.await.expect("join").expect("round");
        assert_eq!(outcome.state, RoundState::Solved);
        assert_eq!(outcome.hint_index, 0);
        assert_eq!(outcome.correct_answerer.as_deref(), Some("U1"));

        record(&harness.ctx, &example(), &outcome).await.expect("record");
        assert!(harness.ledger.counted("U1", "achievement-quiz-clear").await);
        assert!(harness.ledger.counted("U1", "achievement-quiz-clear-easy").await);
        assert!(harness.ledger.unlocks().await.is_empty());

        let texts = harness.web.post_texts().await;
        assert!(texts[0].contains("【E______】（7文字）"));
        assert!(texts.iter().any(|text| text.starts_with("<@U1> 正解です")));
        assert!(
            !texts.iter().any(|text| text == "E______"),
            "answered before the template was posted"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn a_running_round_holds_the_gate() {
        let harness = Harness::new();
        let quiz = quiz(&harness);

        let (ticket, join) = quiz.start_round(example(), "C1").expect("gate free");
        let posted = ticket.started.wait().await.expect("started");
        assert!(quiz.start_round(example(), "C1").is_none());

        harness.publish(answer("C1", &posted.ts, "U1", "example"));
        join.await.expect("join");
        assert!(harness.ledger.counted("U1", "achievement-quiz-clear").await);
        assert!(quiz.start_round(example(), "C1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn template_hint_is_posted_on_the_first_tick() {
        let harness = Harness::new();
        let quiz = AteQuiz::new(
            harness.web.clone(),
            harness.ctx.bus.clone(),
            build_problem(&example(), "C1"),
            AchievementRules::default(),
        );
        let started = quiz.handle().started().clone();
        let round = tokio::spawn(quiz.start(StartMode::Normal));
        let posted = started.wait().await.expect("started");

        tokio::time::sleep(Duration::from_secs(5)).await;
        harness.publish(answer("C1", &posted.ts, "U1", "Example"));
        let outcome = round.await.expect("join").expect("round");

        assert_eq!(outcome.state, RoundState::Solved);
        assert_eq!(outcome.hint_index, 1);
        assert!(outcome.elapsed < Duration::from_secs(120));
        assert_eq!(harness.web.post_texts().await[2], "E______");
    }

    #[tokio::test(start_paused = true)]
    async fn busy_gate_answers_with_an_ephemeral_notice() {
        let harness = Harness::new();
        let quiz = quiz(&harness);

        let first = quiz.on_wake_word(&wake("C1", "U1", "実績当てクイズ"), "C1").await.expect("first");
        assert!(first.is_some());
        let second = quiz.on_wake_word(&wake("C1", "U2", "実績当てクイズ"), "C1").await.expect("second");
        assert!(second.is_none());
        assert_eq!(harness.web.ephemerals().await, vec![("U2".to_string(), "今クイズ中だよ".to_string())]);

        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(harness.ledger.calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_wake_words_start_a_single_round() {
        let harness = Harness::new();
        let quiz = quiz(&harness);

        let (wake1, wake2, wake3) = (
            wake("C1", "U1", "実績当てクイズ"),
            wake("C1", "U2", "実績当てクイズ"),
            wake("C1", "U3", "実績当てクイズ"),
        );
        let (first, second, third) = tokio::join!(
            quiz.on_wake_word(&wake1, "C1"),
            quiz.on_wake_word(&wake2, "C1"),
            quiz.on_wake_word(&wake3, "C1"),
        );
        let responses = [first, second, third].map(|response| response.expect("handled"));
        assert_eq!(responses.iter().filter(|response| response.is_some()).count(), 1);

        let busy = harness.web.ephemerals().await;
        assert_eq!(busy.len(), 2);
        assert!(busy.iter().all(|(_, text)| text == "今クイズ中だよ"));
        let problems = harness
            .web
            .post_texts()
            .await
            .into_iter()
            .filter(|text| text.contains("【E______】"))
            .count();
        assert_eq!(problems, 1);
    }
}
