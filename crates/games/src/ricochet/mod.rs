//! ハイパーロボット: single-player ricochet robots puzzles answered in a thread.

pub mod battle;
pub mod board;
pub mod command;
pub mod generator;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::Gate;
use quizbot_slack::{
    BotIdentity, MessageBuilder, MessageEvent, MessagePayload, MessageTemplate, WakeError,
    WakeResponse, WakeWordHandler,
};
use regex::Regex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::atequiz::{AteQuiz, QuizHandle, QuizOutcome, QuizProblem, QuizRules, StartMode, Verdict};
use crate::context::GameContext;
use crate::error::QuizError;
use crate::session::{launch, RoundTicket};

use self::battle::Battle;
use self::board::{describe_moves, Board, Move};
use self::command::{parse, Command};
use self::generator::{generate, BoardSpec, Puzzle};

pub const GAME: &str = "ricochet-robots";
pub const MAX_DEPTH: usize = 1000;
const DEBUGGER_ACHIEVEMENT: &str = "ricochet-robots-debugger";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Difficulty {
    Baby,
    Super,
    Hyper,
}

impl Difficulty {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "ベイビー" => Some(Difficulty::Baby),
            "スーパー" => Some(Difficulty::Super),
            "ハイパー" => Some(Difficulty::Hyper),
            _ => None,
        }
    }

    pub fn spec(self) -> BoardSpec {
        match self {
            Difficulty::Baby => BoardSpec { width: 5, height: 3, walls: 3 },
            Difficulty::Super => BoardSpec { width: 7, height: 5, walls: 10 },
            Difficulty::Hyper => BoardSpec { width: 9, height: 7, walls: 15 },
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundRequest {
    pub difficulty: Difficulty,
    pub depth: usize,
    pub battle: bool,
}

fn code_block(board: &Board) -> String {
    format!("```\n{}\n```", board.render())
}

fn play(puzzle: &Puzzle, moves: &[Move]) -> Board {
    let mut board = puzzle.board.clone();
    board.apply_all(moves);
    board
}

fn solved_comment(optimal: usize, moves: usize) -> String {
    let mut comment = "正解です!:tada:".to_string();
    if moves == optimal {
        comment.push_str("さらに最短勝利です!:waiwai:");
    }
    comment
}

fn not_solved_template(played: &Board) -> MessageTemplate {
    MessageBuilder::new("解けてませんね:thinking_face:")
        .section("ricochet-not-solved", |section| {
            section.mrkdwn(format!("解けてませんね:thinking_face:\n{}", code_block(played)));
        })
        .build()
}

/// The player's final board next to the bot's own solution.
fn answer_template(puzzle: &Puzzle, moves: &[Move], elapsed: Option<Duration>) -> MessageTemplate {
    let optimal = puzzle.solution.len();
    let bot_comment = if moves.len() > optimal {
        format!("実は{optimal}手でたどり着けるんです。\n{}", describe_moves(&puzzle.solution))
    } else {
        format!("僕の見つけた手順です。\n{}", describe_moves(&puzzle.solution))
    };

    let mut builder = MessageBuilder::new(bot_comment.clone());
    if moves.len() < optimal {
        builder = builder.section("ricochet-bug", |section| {
            section.mrkdwn("というか:bug:ってますね...????? 管理者に連絡してください。");
        });
    }
    let player_board = code_block(&play(puzzle, moves));
    let bot_board = code_block(&play(puzzle, &puzzle.solution));
    builder = builder
        .section("ricochet-player", |section| {
            section.mrkdwn(format!("プレイヤーの回答\n{player_board}"));
        })
        .section("ricochet-bot", |section| {
            section.mrkdwn(format!("{bot_comment}\n{bot_board}"));
        });
    if let Some(elapsed) = elapsed {
        builder = builder.section("ricochet-elapsed", |section| {
            section.mrkdwn(format!("経過時間: {} 秒", seconds(elapsed)));
        });
    }
    builder.build()
}

fn seconds(elapsed: Duration) -> String {
    let millis = elapsed.as_millis() as f64;
    format!("{}", millis / 1000.0)
}

pub fn build_problem(puzzle: &Puzzle, channel: &str, thread_ts: Option<&str>) -> QuizProblem {
    let headline = format!("{}手詰めです", puzzle.solution.len());
    let board_text = format!("{}\n{}", puzzle.board.goal_legend(), code_block(&puzzle.board));
    let template = MessageBuilder::new(headline.clone())
        .section("ricochet-problem", |section| {
            section.plain(headline.clone());
        })
        .section("ricochet-board", |section| {
            section.mrkdwn(board_text);
        })
        .build();
    let mut problem_message = MessagePayload::from_template(channel, template);
    if let Some(thread_ts) = thread_ts {
        problem_message = problem_message.in_thread(thread_ts).broadcast();
    }

    let solution: String = puzzle
        .solution
        .iter()
        .map(|step| format!("{}{}", step.robot.name(), step.direction.name()))
        .collect();
    QuizProblem::new(
        problem_message,
        MessagePayload::text(channel, "正解です!:tada:").broadcast(),
        MessagePayload::text(channel, "時間切れです:cry:").broadcast(),
        vec![solution],
    )
    .with_immediate(MessagePayload::text(channel, "このスレッドに回答してね！"))
}

/// Judges move commands by playing them on a copy of the board. Never times out.
#[derive(Clone, Debug)]
pub struct RicochetRules {
    puzzle: Arc<Puzzle>,
}

impl RicochetRules {
    pub fn new(puzzle: Arc<Puzzle>) -> Self {
        Self { puzzle }
    }

    fn optimal(&self) -> usize {
        self.puzzle.solution.len()
    }

    fn winning_command(winner: &MessageEvent) -> Result<Command, QuizError> {
        parse(winner.text().trim())
            .ok_or_else(|| QuizError::Aborted("winning answer is not a move command".to_string()))
    }
}

#[async_trait]
impl QuizRules for RicochetRules {
    fn wait(&self, _hint_index: usize, _hint_count: usize) -> Option<Duration> {
        None
    }

    fn judge(&self, problem: &QuizProblem, answer: &str, _user: &str) -> Verdict {
        let Some(command) = parse(answer.trim()) else {
            return Verdict::incorrect();
        };
        let optimal = self.optimal();
        if !command.made && command.moves.len() > optimal {
            let reply = format!(
                "この問題は{optimal}手詰めだよ。その手は{}手かかってるよ:thinking_face:\n\
                 もし最短でなくてもよいなら、手順のあとに「まで」をつけてね。",
                command.moves.len()
            );
            let reply = MessagePayload::text(problem.channel(), reply);
            return Verdict::Incorrect { reply: Some(reply) };
        }

        let played = play(&self.puzzle, &command.moves);
        if played.is_cleared() {
            return Verdict::Correct;
        }
        let reply = MessagePayload::from_template(problem.channel(), not_solved_template(&played));
        Verdict::Incorrect { reply: Some(reply) }
    }

    async fn solved_message(
        &self,
        problem: &QuizProblem,
        winner: &MessageEvent,
        _elapsed: Duration,
    ) -> Result<MessagePayload, QuizError> {
        let command = Self::winning_command(winner)?;
        let comment = solved_comment(self.optimal(), command.moves.len());
        Ok(MessagePayload::text(problem.channel(), comment).broadcast())
    }

    async fn answer_message(
        &self,
        problem: &QuizProblem,
        winner: Option<&MessageEvent>,
        elapsed: Duration,
    ) -> Result<Option<MessagePayload>, QuizError> {
        let Some(winner) = winner else {
            return Ok(None);
        };
        let command = Self::winning_command(winner)?;
        let template = answer_template(&self.puzzle, &command.moves, Some(elapsed));
        Ok(Some(MessagePayload::from_template(problem.channel(), template)))
    }

    fn ng_reaction(&self) -> Option<&str> {
        None
    }
}

/// Achievements for clearing a board with `optimal` shortest moves using `moves` moves.
pub fn clear_achievements(optimal: usize, moves: usize, elapsed: Duration) -> Vec<&'static str> {
    let mut unlocked = vec!["ricochet-robots-clear"];
    unlocked.extend(shortest_achievements(optimal, moves));
    if moves <= optimal && optimal >= 8 {
        for (per_move, id) in [
            (10, "ricochet-robots-clear-in-10sec-per-move-over8"),
            (5, "ricochet-robots-clear-in-5sec-per-move-over8"),
            (1, "ricochet-robots-clear-in-1sec-per-move-over8"),
        ] {
            if elapsed <= Duration::from_secs(per_move * optimal as u64) {
                unlocked.push(id);
            }
        }
    }
    unlocked
}

/// Achievements for reaching the goal in no more than the bot's shortest solution.
pub fn shortest_achievements(optimal: usize, moves: usize) -> Vec<&'static str> {
    let mut unlocked = Vec::new();
    if moves <= optimal {
        unlocked.push("ricochet-robots-clear-shortest");
        for (threshold, id) in [
            (10, "ricochet-robots-clear-shortest-over10"),
            (15, "ricochet-robots-clear-shortest-over15"),
            (20, "ricochet-robots-clear-shortest-over20"),
        ] {
            if optimal >= threshold {
                unlocked.push(id);
            }
        }
    }
    if moves < optimal {
        unlocked.push(DEBUGGER_ACHIEVEMENT);
    }
    unlocked
}

pub struct RicochetRobots {
    ctx: GameContext,
    gate: Gate,
    active: Arc<Mutex<Option<QuizHandle>>>,
    wake_word: Regex,
}

impl RicochetRobots {
    pub fn new(ctx: GameContext) -> Result<Self, QuizError> {
        Ok(Self {
            ctx,
            gate: Gate::new(),
            active: Arc::new(Mutex::new(None)),
            wake_word: Regex::new(r"^(ベイビー|スーパー|ハイパー)ロボット(?:(バトル)|(?: (\d+)手)?)$")?,
        })
    }

    pub fn identity() -> BotIdentity {
        BotIdentity::new("hyperrobot", ":robot_face:")
    }

    /// Depth defaults to the deepest board available and is clamped to `1..=MAX_DEPTH`.
    /// Battles always use the deepest board.
    pub fn parse_request(&self, text: &str) -> Option<RoundRequest> {
        let captures = self.wake_word.captures(text)?;
        let difficulty = Difficulty::from_label(captures.get(1)?.as_str())?;
        let battle = captures.get(2).is_some();
        let depth = captures
            .get(3)
            .map_or(MAX_DEPTH, |depth| depth.as_str().parse().unwrap_or(MAX_DEPTH))
            .clamp(1, MAX_DEPTH);
        Some(RoundRequest { difficulty, depth, battle })
    }

    /// Generates a board and starts a round or a battle; `None` when one is already running.
    pub fn start_round(
        &self,
        request: RoundRequest,
        channel: &str,
        thread_ts: Option<String>,
        requester: &str,
    ) -> Option<(RoundTicket, JoinHandle<()>)> {
        let spec = request.difficulty.spec();
        let make_puzzle = move || generate(spec, request.depth, &mut rand::thread_rng());
        if request.battle {
            self.spawn_battle(channel, requester, make_puzzle)
        } else {
            self.spawn_round(channel, thread_ts, requester, make_puzzle)
        }
    }

    fn spawn_round<F>(
        &self,
        channel: &str,
        thread_ts: Option<String>,
        requester: &str,
        make_puzzle: F,
    ) -> Option<(RoundTicket, JoinHandle<()>)>
    where
        F: FnOnce() -> Option<Puzzle> + Send + 'static,
    {
        let guard = self.gate.try_acquire()?;
        let ctx = self.ctx.clone();
        let active = Arc::clone(&self.active);
        let channel_id = channel.to_string();
        let requester = requester.to_string();

        Some(launch(Arc::clone(&self.ctx.web), GAME, channel, move |started| async move {
            let _guard = guard;
            let origin = BoardOrigin { channel: &channel_id, thread_ts: thread_ts.as_deref() };
            let Some(puzzle) = generate_board(&ctx, origin, &requester, make_puzzle).await? else {
                return Ok(());
            };

            let problem = build_problem(&puzzle, &channel_id, thread_ts.as_deref());
            let rules = RicochetRules::new(Arc::clone(&puzzle));
            let quiz = AteQuiz::new(Arc::clone(&ctx.web), ctx.bus.clone(), problem, rules)
                .with_identity(Self::identity())
                .with_tick(ctx.settings.tick)
                .with_started(started);
            *active.lock().await = Some(quiz.handle());
            let result = quiz.start(StartMode::Normal).await;
            active.lock().await.take();
            record(&ctx, &puzzle, &result?).await
        }))
    }

    /// Battles are played at the top level of `channel`.
    fn spawn_battle<F>(
        &self,
        channel: &str,
        requester: &str,
        make_puzzle: F,
    ) -> Option<(RoundTicket, JoinHandle<()>)>
    where
        F: FnOnce() -> Option<Puzzle> + Send + 'static,
    {
        let guard = self.gate.try_acquire()?;
        let ctx = self.ctx.clone();
        let channel_id = channel.to_string();
        let requester = requester.to_string();
        let inbox = self.ctx.bus.subscribe();

        Some(launch(Arc::clone(&self.ctx.web), GAME, channel, move |started| async move {
            let _guard = guard;
            let origin = BoardOrigin { channel: &channel_id, thread_ts: None };
            let Some(puzzle) = generate_board(&ctx, origin, &requester, make_puzzle).await? else {
                return Ok(());
            };
            let battle = Battle::new(ctx, puzzle, channel_id.as_str());
            let outcome = battle.run(inbox, started, &requester).await?;
            info!(
                event_name = "ricochet.battle.finished",
                game = GAME,
                channel_id = %channel_id,
                state = outcome.state.as_str(),
                winner = outcome.winner.as_deref().unwrap_or_default(),
                players = outcome.order.len(),
                "battle finished"
            );
            Ok(())
        }))
    }

    async fn repost_or_busy(&self, message: &MessageEvent) {
        let handle = self.active.lock().await.clone();
        let Some(handle) = handle else {
            self.ctx.notify_busy(message).await;
            return;
        };
        if let Err(error) = handle.repost_problem().await {
            warn!(
                event_name = "ricochet.repost_failed",
                game = GAME,
                channel_id = %message.channel_id,
                error = %error,
                "could not repost the running problem"
            );
        }
    }
}

#[derive(Clone, Copy)]
struct BoardOrigin<'a> {
    channel: &'a str,
    thread_ts: Option<&'a str>,
}

/// Runs `make_puzzle` on the blocking pool. A failure is reported where the board would
/// have been posted and earns the requester the debugger achievement.
async fn generate_board<F>(
    ctx: &GameContext,
    origin: BoardOrigin<'_>,
    requester: &str,
    make_puzzle: F,
) -> Result<Option<Arc<Puzzle>>, QuizError>
where
    F: FnOnce() -> Option<Puzzle> + Send + 'static,
{
    let detail = match tokio::task::spawn_blocking(make_puzzle).await {
        Ok(Some(puzzle)) => {
            info!(
                event_name = "ricochet.board.generated",
                game = GAME,
                channel_id = %origin.channel,
                moves = puzzle.solution.len(),
                "board generated"
            );
            return Ok(Some(Arc::new(puzzle)));
        }
        Ok(None) => "no solvable board could be generated".to_string(),
        Err(error) => format!("board generation failed: {error}"),
    };
    warn!(
        event_name = "ricochet.board.generation_failed",
        game = GAME,
        channel_id = %origin.channel,
        user_id = requester,
        error = %detail,
        "board generation failed"
    );
    let mut report = MessagePayload::text(origin.channel, format!("内部errorです:cry:\n{detail}"));
    if let Some(thread_ts) = origin.thread_ts {
        report = report.in_thread(thread_ts);
    }
    ctx.web.post_message(&report.with_identity(&RicochetRobots::identity())).await?;
    ctx.ledger.unlock(requester, DEBUGGER_ACHIEVEMENT).await?;
    Ok(None)
}

async fn record(
    ctx: &GameContext,
    puzzle: &Puzzle,
    outcome: &QuizOutcome,
) -> Result<(), QuizError> {
    let (Some(winner), Some(answer)) =
        (outcome.correct_answerer.as_deref(), outcome.winning_answer.as_deref())
    else {
        return Ok(());
    };
    let Some(command) = parse(answer.trim()) else {
        return Ok(());
    };
    for id in clear_achievements(puzzle.solution.len(), command.moves.len(), outcome.elapsed) {
        ctx.ledger.unlock(winner, id).await?;
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
impl WakeWordHandler for RicochetRobots {
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
        let Some(request) = self.parse_request(message.text()) else {
            return Ok(None);
        };
        let thread_ts = (message.channel_id == channel).then(|| message.ts.clone());
        match self.start_round(request, channel, thread_ts, message.user()) {
            Some((ticket, _join)) => Ok(ticket.wake_response().await),
            None => {
                self.repost_or_busy(message).await;
                Ok(None)
            }
        }
    }
}
