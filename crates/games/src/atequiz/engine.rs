//! The round driver: posts the problem, escalates hints on a tick, judges thread replies.
//!
//! Message handling and the tick are arms of one `select!` loop over the round, so a hint
//! can never be posted concurrently with a winning answer. Messages are taken first when
//! both are ready.

use std::sync::Arc;
use std::time::Duration;

use quizbot_core::{Deferred, QuizRound, RoundState, ThreadRef};
use quizbot_slack::{
    BotIdentity, MessageBus, MessageEvent, MessagePayload, PostedMessage, SlackWebApi,
};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::atequiz::problem::{fill_winner, QuizProblem};
use crate::atequiz::rules::{QuizRules, Verdict};
use crate::error::QuizError;

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum StartMode {
    #[default]
    Normal,
    /// Only `player`'s messages are judged.
    Solo { player: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizOutcome {
    pub state: RoundState,
    pub correct_answerer: Option<String>,
    pub hint_index: usize,
    pub elapsed: Duration,
    pub winning_answer: Option<String>,
    pub problem_message: PostedMessage,
    /// Messages the round never saw because it fell behind the bus.
    pub skipped_messages: u64,
}

impl QuizOutcome {
    pub fn is_solved(&self) -> bool {
        self.state == RoundState::Solved
    }
}

/// Lets an adapter reach a running round from outside the engine task.
#[derive(Clone)]
pub struct QuizHandle {
    web: Arc<dyn SlackWebApi>,
    started: Deferred<PostedMessage>,
    problem_message: MessagePayload,
    identity: Option<BotIdentity>,
}

impl QuizHandle {
    pub fn started(&self) -> &Deferred<PostedMessage> {
        &self.started
    }

    /// Posts the problem again into its thread, broadcast to the channel.
    pub async fn repost_problem(&self) -> Result<PostedMessage, QuizError> {
        let posted = self
            .started
            .wait()
            .await
            .map_err(|error| QuizError::Aborted(error.to_string()))?;
        let mut message =
            self.problem_message.clone().in_thread(posted.thread_anchor()).broadcast();
        if let Some(identity) = &self.identity {
            message = message.with_identity(identity);
        }
        Ok(self.web.post_message(&message).await?)
    }
}

pub struct AteQuiz<R> {
    web: Arc<dyn SlackWebApi>,
    bus: MessageBus,
    problem: QuizProblem,
    rules: R,
    identity: Option<BotIdentity>,
    tick: Duration,
    started: Deferred<PostedMessage>,
}

impl<R: QuizRules> AteQuiz<R> {
    pub fn new(web: Arc<dyn SlackWebApi>, bus: MessageBus, problem: QuizProblem, rules: R) -> Self {
        Self {
            web,
            bus,
            problem,
            rules,
            identity: None,
            tick: DEFAULT_TICK,
            started: Deferred::new(),
        }
    }

    pub fn with_identity(mut self, identity: BotIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Resolved with the posted problem message once the round is running.
    pub fn with_started(mut self, started: Deferred<PostedMessage>) -> Self {
        self.started = started;
        self
    }

    pub fn problem(&self) -> &QuizProblem {
        &self.problem
    }

    pub fn handle(&self) -> QuizHandle {
        QuizHandle {
            web: Arc::clone(&self.web),
            started: self.started.clone(),
            problem_message: self.problem.problem_message.clone(),
            identity: self.identity.clone(),
        }
    }

    /// Runs the round to its terminal state.
    pub async fn start(self, mode: StartMode) -> Result<QuizOutcome, QuizError> {
        self.problem.validate()?;

        let mut inbox = self.bus.subscribe();
        let problem_message = self.post(self.problem.problem_message.clone()).await?;
        let thread = ThreadRef {
            channel: problem_message.channel.clone(),
            ts: problem_message.thread_anchor().to_string(),
        };
        self.started.resolve(problem_message.clone());

        if let Some(immediate) = &self.problem.immediate_message {
            self.post(immediate.clone().in_thread(&thread.ts)).await?;
        }

        let mut round = QuizRound::new(self.problem.hint_messages.len());
        round.start(thread.clone(), Instant::now())?;
        info!(
            event_name = "quiz.round.started",
            channel_id = %thread.channel,
            thread_ts = %thread.ts,
            hint_count = round.hint_count(),
            "quiz round started"
        );

        let mut ticker = interval_at(Instant::now() + self.tick, self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut skipped_messages = 0;

        loop {
            tokio::select! {
                biased;
                received = inbox.recv() => match received {
                    Ok(message) => {
                        let outcome = self
                            .on_message(&mut round, &thread, &mode, &problem_message, message)
                            .await?;
                        if let Some(outcome) = outcome {
                            return Ok(QuizOutcome { skipped_messages, ..outcome });
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        skipped_messages += skipped;
                        warn!(
                            event_name = "quiz.round.lagged",
                            channel_id = %thread.channel,
                            thread_ts = %thread.ts,
                            hint_index = round.hint_index(),
                            skipped,
                            skipped_total = skipped_messages,
                            "round fell behind; answers in the gap were not judged"
                        );
                    }
                    Err(RecvError::Closed) => {
                        round.abort(Instant::now())?;
                        return Err(QuizError::Aborted("message stream closed".to_string()));
                    }
                },
                _ = ticker.tick() => {
                    let outcome = self.on_tick(&mut round, &thread, &problem_message).await?;
                    if let Some(outcome) = outcome {
                        return Ok(QuizOutcome { skipped_messages, ..outcome });
                    }
                }
            }
        }
    }

    async fn on_tick(
        &self,
        round: &mut QuizRound,
        thread: &ThreadRef,
        problem_message: &PostedMessage,
    ) -> Result<Option<QuizOutcome>, QuizError> {
        let Some(wait) = self.rules.wait(round.hint_index(), round.hint_count()) else {
            return Ok(None);
        };
        let now = Instant::now();
        match round.next_deadline(wait) {
            Some(deadline) if now >= deadline => {}
            _ => return Ok(None),
        }

        if round.hints_remaining() {
            let revealed = round.reveal_hint(now)?;
            if let Some(hint) = self.problem.hint_messages.get(revealed) {
                self.post(hint.clone().in_thread(&thread.ts)).await?;
            }
            debug!(
                event_name = "quiz.round.hint",
                channel_id = %thread.channel,
                hint_index = round.hint_index(),
                "hint revealed"
            );
            return Ok(None);
        }

        round.expire(now)?;
        let elapsed = round.elapsed(now);
        info!(
            event_name = "quiz.round.unsolved",
            channel_id = %thread.channel,
            hint_index = round.hint_index(),
            elapsed_ms = elapsed.as_millis() as u64,
            "quiz round timed out"
        );
        self.post(self.problem.unsolved_message.clone().in_thread(&thread.ts)).await?;
        if let Some(answer) = self.rules.answer_message(&self.problem, None, elapsed).await? {
            self.post(answer.in_thread(&thread.ts)).await?;
        }
        Ok(Some(self.outcome(round, elapsed, None, problem_message)))
    }

    async fn on_message(
        &self,
        round: &mut QuizRound,
        thread: &ThreadRef,
        mode: &StartMode,
        problem_message: &PostedMessage,
        message: MessageEvent,
    ) -> Result<Option<QuizOutcome>, QuizError> {
        if !message.is_in_thread(&thread.channel, &thread.ts) || !is_candidate(&message) {
            return Ok(None);
        }
        if let StartMode::Solo { player } = mode {
            if message.user() != player {
                return Ok(None);
            }
        }

        match self.rules.judge(&self.problem, message.text(), message.user()) {
            Verdict::Correct => {
                let now = Instant::now();
                round.solve(message.user(), now)?;
                let elapsed = round.elapsed(now);
                info!(
                    event_name = "quiz.round.solved",
                    channel_id = %thread.channel,
                    user_id = message.user(),
                    hint_index = round.hint_index(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "quiz round solved"
                );
                let solved = self.rules.solved_message(&self.problem, &message, elapsed).await?;
                self.post(fill_winner(solved, message.user()).in_thread(&thread.ts)).await?;
                if let Some(answer) =
                    self.rules.answer_message(&self.problem, Some(&message), elapsed).await?
                {
                    self.post(answer.in_thread(&thread.ts)).await?;
                }
                let answer = Some(message.text().to_string());
                Ok(Some(self.outcome(round, elapsed, answer, problem_message)))
            }
            Verdict::Incorrect { reply } => {
                if let Some(reaction) = self.rules.ng_reaction() {
                    if let Err(error) =
                        self.web.add_reaction(&message.channel_id, &message.ts, reaction).await
                    {
                        warn!(
                            event_name = "quiz.round.reaction_failed",
                            channel_id = %thread.channel,
                            error = %error,
                            "could not react to an incorrect answer"
                        );
                    }
                }
                let reply = reply.or_else(|| self.rules.incorrect_message(&self.problem, &message));
                if let Some(reply) = reply {
                    if let Err(error) = self.post(reply.in_thread(&thread.ts)).await {
                        warn!(
                            event_name = "quiz.round.reply_failed",
                            channel_id = %thread.channel,
                            error = %error,
                            "could not reply to an incorrect answer"
                        );
                    }
                }
                Ok(None)
            }
        }
    }

    async fn post(&self, message: MessagePayload) -> Result<PostedMessage, QuizError> {
        let message = match &self.identity {
            Some(identity) => message.with_identity(identity),
            None => message,
        };
        Ok(self.web.post_message(&message).await?)
    }

    fn outcome(
        &self,
        round: &QuizRound,
        elapsed: Duration,
        winning_answer: Option<String>,
        problem_message: &PostedMessage,
    ) -> QuizOutcome {
        QuizOutcome {
            state: round.state(),
            correct_answerer: round.correct_answerer().map(str::to_string),
            hint_index: round.hint_index(),
            elapsed,
            winning_answer,
            problem_message: problem_message.clone(),
            skipped_messages: 0,
        }
    }
}

/// Human replies only; thread broadcasts still count as answers.
fn is_candidate(message: &MessageEvent) -> bool {
    message.user_id.is_some()
        && message.text.is_some()
        && message.bot_id.is_none()
        && matches!(message.subtype.as_deref(), None | Some("thread_broadcast"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quizbot_core::RoundState;
    use quizbot_slack::testing::RecordingWebApi;
    use quizbot_slack::{MessageBus, MessagePayload};

    use super::{AteQuiz, StartMode};
    use crate::atequiz::problem::{typical, QuizProblem};
    use crate::atequiz::rules::StandardRules;
    use crate::testing::answer as reply;

    fn problem(hints: usize) -> QuizProblem {
        QuizProblem::new(
            MessagePayload::text("C1", typical::problem("実績")),
            MessagePayload::text("C1", typical::solved("Foo Bar")),
            MessagePayload::text("C1", typical::unsolved("Foo Bar")),
            vec!["Foo Bar".to_string()],
        )
        .with_hints(
            (0..hints).map(|index| MessagePayload::text("C1", format!("hint {index}"))).collect(),
        )
        .with_immediate(MessagePayload::text("C1", typical::immediate(15)))
    }

    #[tokio::test(start_paused = true)]
    async fn round_times_out_after_every_hint() {
        let web = Arc::new(RecordingWebApi::new());
        let bus = MessageBus::new();
        let quiz = AteQuiz::new(web.clone(), bus, problem(5), StandardRules::default());

        let outcome = quiz.start(StartMode::Normal).await.expect("round");

        assert_eq!(outcome.state, RoundState::Unsolved);
        assert_eq!(outcome.hint_index, 5);
        assert!(outcome.correct_answerer.is_none());
        assert!(outcome.elapsed >= Duration::from_secs(5 * 15 + 30));

        let texts = web.post_texts().await;
        assert_eq!(texts.len(), 1 + 1 + 5 + 1);
        let hints = &texts[2..7];
        assert!(hints.iter().enumerate().all(|(index, text)| *text == format!("hint {index}")));
        assert!(texts.last().expect("unsolved").contains("Foo Bar"));

        let posts = web.posts().await;
        let anchor = "1700000000.000001";
        assert!(posts[1..].iter().all(|post| post.thread_ts.as_deref() == Some(anchor)));
    }

    #[tokio::test(start_paused = true)]
    async fn first_correct_answer_wins_and_later_ones_are_ignored() {
        let web = Arc::new(RecordingWebApi::new());
        let bus = MessageBus::new();
        let quiz = AteQuiz::new(web.clone(), bus.clone(), problem(2), StandardRules::default());
        let started = quiz.handle().started().clone();

        let round = tokio::spawn(quiz.start(StartMode::Normal));
        let posted = started.wait().await.expect("started");

        bus.publish(reply("C1", &posted.ts, "U1", "foo"));
        bus.publish(reply("C2", &posted.ts, "U2", "Foo Bar"));
        bus.publish(reply("C1", &posted.ts, "U3", "ＦＯＯ　ＢＡＲ"));
        bus.publish(reply("C1", &posted.ts, "U4", "Foo Bar"));

        let outcome = round.await.expect("join").expect("round");
        assert_eq!(outcome.state, RoundState::Solved);
        assert_eq!(outcome.correct_answerer.as_deref(), Some("U3"));
        assert_eq!(outcome.hint_index, 0);

        let texts = web.post_texts().await;
        let solved: Vec<_> = texts.iter().filter(|text| text.contains("正解")).collect();
        assert_eq!(solved.len(), 1);
        assert!(solved[0].starts_with("<@U3>"));
        assert_eq!(web.reactions().await, vec!["no_good".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn lagging_round_counts_skipped_answers_and_keeps_judging() {
        let web = Arc::new(RecordingWebApi::new());
        let bus = MessageBus::with_capacity(2);
        let quiz = AteQuiz::new(web.clone(), bus.clone(), problem(2), StandardRules::default());
        let started = quiz.handle().started().clone();

        let round = tokio::spawn(quiz.start(StartMode::Normal));
        let posted = started.wait().await.expect("started");

        // published back to back, so the round only sees the last two
        bus.publish(reply("C1", &posted.ts, "U1", "Foo Bar"));
        bus.publish(reply("C1", &posted.ts, "U2", "bar"));
        bus.publish(reply("C1", &posted.ts, "U3", "baz"));
        bus.publish(reply("C1", &posted.ts, "U4", "qux"));
        bus.publish(reply("C1", &posted.ts, "U5", "foo bar"));

        let outcome = round.await.expect("join").expect("round");
        assert_eq!(outcome.state, RoundState::Solved);
        assert_eq!(outcome.correct_answerer.as_deref(), Some("U5"));
        assert_eq!(outcome.skipped_messages, 3);
        assert_eq!(web.reactions().await.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn solo_rounds_and_bot_messages_are_filtered() {
        let web = Arc::new(RecordingWebApi::new());
        let bus = MessageBus::new();
        let quiz = AteQuiz::new(web.clone(), bus.clone(), problem(0), StandardRules::default());
        let started = quiz.handle().started().clone();

        let round = tokio::spawn(quiz.start(StartMode::Solo { player: "U9".to_string() }));
        let posted = started.wait().await.expect("started");

        let mut from_bot = reply("C1", &posted.ts, "U9", "Foo Bar");
        from_bot.bot_id = Some("B1".to_string());
        bus.publish(from_bot);
        bus.publish(reply("C1", &posted.ts, "U1", "Foo Bar"));
        let mut broadcast = reply("C1", &posted.ts, "U9", "foo bar");
        broadcast.subtype = Some("thread_broadcast".to_string());
        bus.publish(broadcast);

        let outcome = round.await.expect("join").expect("round");
        assert_eq!(outcome.correct_answerer.as_deref(), Some("U9"));
        assert!(web.reactions().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repost_broadcasts_the_problem_into_its_thread() {
        let web = Arc::new(RecordingWebApi::new());
        let bus = MessageBus::new();
        let quiz = AteQuiz::new(web.clone(), bus.clone(), problem(0), StandardRules::default());
        let handle = quiz.handle();

        let round = tokio::spawn(quiz.start(StartMode::Normal));
        let reposted = handle.repost_problem().await.expect("repost");
        assert_eq!(reposted.thread_ts.as_deref(), Some("1700000000.000001"));

        let posts = web.posts().await;
        let repost = posts.iter().find(|post| post.reply_broadcast).expect("broadcast repost");
        assert_eq!(repost.text, typical::problem("実績"));

        round.abort();
    }

    #[tokio::test]
    async fn mismatched_follow_up_channels_are_rejected_before_posting() {
        let web = Arc::new(RecordingWebApi::new());
        let problem = problem(0).with_answer(MessagePayload::text("C2", "answer"));
        let quiz = AteQuiz::new(web.clone(), MessageBus::new(), problem, StandardRules::default());

        assert!(quiz.start(StartMode::Normal).await.is_err());
        assert!(web.posts().await.is_empty());
    }
}
