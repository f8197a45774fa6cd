//! ハイパーロボットバトル: players bid how few moves they need, then prove it in bid order.
//!
//! Bids are plain numbers (`5` or `5手`) posted at the top level of the channel. The
//! bidding window opens with the first bid. Afterwards each bidder gets one timed turn,
//! fewest moves first and earlier bids first among equals.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use quizbot_core::config::QuizConfig;
use quizbot_core::{Deferred, QuizRound, RoundState, ThreadRef};
use quizbot_slack::{MessageBuilder, MessageEvent, MessagePayload, PostedMessage};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::context::GameContext;
use crate::error::QuizError;

use super::board::describe_moves;
use super::command::parse;
use super::generator::Puzzle;
use super::{
    answer_template, code_block, not_solved_template, play, shortest_achievements,
    solved_comment, RicochetRobots, GAME,
};

pub const PLAY_ACHIEVEMENT: &str = "ricochet-robots-buttle-play";
pub const WIN_ACHIEVEMENT: &str = "ricochet-robots-buttle-win";

/// A battle nobody bids on is abandoned after this many bidding windows.
const IDLE_WINDOWS: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BattleTiming {
    pub bidding: Duration,
    pub turn: Duration,
}

impl Default for BattleTiming {
    fn default() -> Self {
        Self { bidding: Duration::from_secs(60), turn: Duration::from_secs(60) }
    }
}

impl BattleTiming {
    pub fn from_config(config: &QuizConfig) -> Self {
        Self {
            bidding: Duration::from_secs(config.battle_bidding_secs),
            turn: Duration::from_secs(config.battle_turn_secs),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Bid {
    pub moves: usize,
    /// Slack timestamp of the bidding message, in seconds.
    pub time: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Turn {
    pub user: String,
    pub moves: usize,
}

/// Latest bid per player.
#[derive(Debug, Default)]
pub struct Bids {
    by_user: HashMap<String, Bid>,
}

impl Bids {
    /// Records `bid` unless `user` already has a later one. Returns whether it was kept.
    pub fn place(&mut self, user: &str, bid: Bid) -> bool {
        match self.by_user.get(user) {
            Some(current) if current.time >= bid.time => false,
            _ => {
                self.by_user.insert(user.to_string(), bid);
                true
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_user.is_empty()
    }

    /// Turn order: fewest moves first, then earliest bid.
    pub fn ordered(&self) -> Vec<Turn> {
        let mut bids: Vec<(&String, &Bid)> = self.by_user.iter().collect();
        bids.sort_by(|(a_user, a), (b_user, b)| {
            a.moves
                .cmp(&b.moves)
                .then(a.time.total_cmp(&b.time))
                .then_with(|| a_user.cmp(b_user))
        });
        bids.into_iter().map(|(user, bid)| Turn { user: user.clone(), moves: bid.moves }).collect()
    }
}

/// `5` or `5手`.
pub fn parse_bid(text: &str) -> Option<usize> {
    let digits = text.strip_suffix('手').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Slack date token shown in the reader's time zone; the fallback text is JST.
fn time_link(after: Duration) -> String {
    let now = Utc::now();
    let deadline: DateTime<Utc> =
        chrono::Duration::from_std(after).map_or(now, |after| now + after);
    let fallback = match FixedOffset::east_opt(9 * 3600) {
        Some(jst) => deadline.with_timezone(&jst).format("%H:%M:%S").to_string(),
        None => deadline.format("%H:%M:%S").to_string(),
    };
    format!("<!date^{}^{{time_secs}}|{fallback}>", deadline.timestamp())
}

fn mention(user: &str) -> String {
    format!("<@{user}>")
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BattleOutcome {
    pub state: RoundState,
    pub winner: Option<String>,
    pub order: Vec<Turn>,
}

pub(crate) struct Battle {
    ctx: GameContext,
    puzzle: Arc<Puzzle>,
    channel: String,
}

impl Battle {
    pub(crate) fn new(ctx: GameContext, puzzle: Arc<Puzzle>, channel: impl Into<String>) -> Self {
        Self { ctx, puzzle, channel: channel.into() }
    }

    fn timing(&self) -> BattleTiming {
        self.ctx.settings.battle
    }

    /// Posts the board, collects bids, then runs the turns.
    ///
    /// `inbox` has to be subscribed before the board is posted so no bid is missed.
    pub(crate) async fn run(
        self,
        mut inbox: Receiver<MessageEvent>,
        started: Deferred<PostedMessage>,
        requester: &str,
    ) -> Result<BattleOutcome, QuizError> {
        let posted = self.post(self.problem_message()).await?;
        started.resolve(posted.clone());
        self.ctx.ledger.unlock(requester, PLAY_ACHIEVEMENT).await?;
        info!(
            event_name = "ricochet.battle.started",
            game = GAME,
            channel_id = %self.channel,
            user_id = requester,
            moves = self.puzzle.solution.len(),
            "battle started"
        );

        let Some(order) = self.collect_bids(&mut inbox).await? else {
            return Ok(BattleOutcome { state: RoundState::Aborted, winner: None, order: vec![] });
        };
        self.take_turns(&mut inbox, &posted, order).await
    }

    fn problem_message(&self) -> MessagePayload {
        let headline = ":question:手詰めです";
        let board = &self.puzzle.board;
        let board = format!("{}\n{}", board.goal_legend(), code_block(board));
        let template = MessageBuilder::new(headline)
            .section("ricochet-problem", |section| {
                section.mrkdwn(headline);
            })
            .section("ricochet-board", |section| {
                section.mrkdwn(board);
            })
            .build();
        MessagePayload::from_template(&self.channel, template)
    }

    fn solution_message(&self, headline: String) -> MessagePayload {
        let board = code_block(&play(&self.puzzle, &self.puzzle.solution));
        let template = MessageBuilder::new(headline.clone())
            .section("ricochet-solution", |section| {
                section.mrkdwn(format!("{headline}\n{board}"));
            })
            .build();
        MessagePayload::from_template(&self.channel, template)
    }

    async fn collect_bids(
        &self,
        inbox: &mut Receiver<MessageEvent>,
    ) -> Result<Option<Vec<Turn>>, QuizError> {
        let mut bids = Bids::default();
        let idle_until = Instant::now() + self.timing().bidding * IDLE_WINDOWS;
        let mut closes_at = None;

        loop {
            tokio::select! {
                biased;
                received = self.next_message(inbox) => {
                    let message = received?;
                    if let Some(moves) = parse_bid(message.text().trim()) {
                        self.on_bid(&mut bids, &message, moves).await?;
                        if closes_at.is_none() && !bids.is_empty() {
                            closes_at = Some(Instant::now() + self.timing().bidding);
                            let text = format!("宣言終了予定時刻: {}", time_link(self.timing().bidding));
                            self.post(MessagePayload::text(&self.channel, text)).await?;
                        }
                    } else if parse(message.text().trim()).is_some() {
                        self.post(MessagePayload::text(&self.channel, "今は宣言中だよ:cry:")).await?;
                    }
                }
                _ = sleep_until(closes_at.unwrap_or(idle_until)) => {
                    if closes_at.is_none() {
                        let headline = format!(
                            "だれも宣言しなかったよ:cry:\n正解は {} の{}手だよ。",
                            describe_moves(&self.puzzle.solution),
                            self.puzzle.solution.len()
                        );
                        self.post(self.solution_message(headline)).await?;
                        info!(
                            event_name = "ricochet.battle.abandoned",
                            game = GAME,
                            channel_id = %self.channel,
                            "nobody bid"
                        );
                        return Ok(None);
                    }
                    let order = bids.ordered();
                    info!(
                        event_name = "ricochet.battle.bidding_closed",
                        game = GAME,
                        channel_id = %self.channel,
                        players = order.len(),
                        "bidding closed"
                    );
                    return Ok(Some(order));
                }
            }
        }
    }

    async fn on_bid(
        &self,
        bids: &mut Bids,
        message: &MessageEvent,
        moves: usize,
    ) -> Result<(), QuizError> {
        let Ok(time) = message.ts.parse::<f64>() else {
            return Ok(());
        };
        let kept = bids.place(message.user(), Bid { moves, time });
        debug!(
            event_name = "ricochet.battle.bid",
            game = GAME,
            user_id = message.user(),
            moves,
            kept,
            "bid received"
        );
        self.ctx.web.add_reaction(&message.channel_id, &message.ts, "ok_hand").await?;
        Ok(())
    }

    async fn take_turns(
        &self,
        inbox: &mut Receiver<MessageEvent>,
        posted: &PostedMessage,
        order: Vec<Turn>,
    ) -> Result<BattleOutcome, QuizError> {
        let mut round = QuizRound::new(order.len());
        let thread = ThreadRef { channel: self.channel.clone(), ts: posted.ts.clone() };
        round.start(thread, Instant::now())?;
        if let Some(first) = order.first() {
            self.announce_turn(first).await?;
        }

        loop {
            let Some(turn) = order.get(round.hint_index()) else {
                round.expire(Instant::now())?;
                let headline = format!(
                    "だれも正解できなかったよ:cry:\n正解は {} の{}手だよ。",
                    describe_moves(&self.puzzle.solution),
                    self.puzzle.solution.len()
                );
                self.post(self.solution_message(headline)).await?;
                info!(
                    event_name = "ricochet.battle.unsolved",
                    game = GAME,
                    channel_id = %self.channel,
                    players = order.len(),
                    "nobody proved their bid"
                );
                return Ok(BattleOutcome { state: round.state(), winner: None, order });
            };
            let deadline =
                round.next_deadline(self.timing().turn).unwrap_or_else(Instant::now);

            tokio::select! {
                biased;
                received = self.next_message(inbox) => {
                    let message = received?;
                    if self.on_answer(&mut round, turn, &message).await? {
                        let winner = round.correct_answerer().map(str::to_string);
                        return Ok(BattleOutcome { state: round.state(), winner, order });
                    }
                }
                _ = sleep_until(deadline) => {
                    let text = format!("{}さんは間に合わなかったみたいだね。残念:cry:", mention(&turn.user));
                    self.post(MessagePayload::text(&self.channel, text)).await?;
                    round.reveal_hint(Instant::now())?;
                    if let Some(next) = order.get(round.hint_index()) {
                        self.announce_turn(next).await?;
                    }
                }
            }
        }
    }

    async fn announce_turn(&self, turn: &Turn) -> Result<(), QuizError> {
        let text = format!(
            "{}さんの解答ターンだよ。\n{}手以下の手順を{}までに解答してね。",
            mention(&turn.user),
            turn.moves,
            time_link(self.timing().turn)
        );
        self.post(MessagePayload::text(&self.channel, text)).await?;
        Ok(())
    }

    /// Returns whether `message` proved the current player's bid.
    async fn on_answer(
        &self,
        round: &mut QuizRound,
        turn: &Turn,
        message: &MessageEvent,
    ) -> Result<bool, QuizError> {
        let Some(command) = parse(message.text().trim()) else {
            return Ok(false);
        };
        if message.user() != turn.user {
            let text = format!("今は{}さんの解答時間だよ。", mention(&turn.user));
            self.post(MessagePayload::text(&self.channel, text)).await?;
            return Ok(false);
        }
        let moves = command.moves.len();
        if moves > turn.moves {
            let text = format!(
                "{}さんの宣言手数は{}手だよ:cry:\nその手は{moves}手かかってるよ。",
                mention(&turn.user),
                turn.moves
            );
            self.post(MessagePayload::text(&self.channel, text)).await?;
            return Ok(false);
        }

        let played = play(&self.puzzle, &command.moves);
        if !played.is_cleared() {
            let reply = MessagePayload::from_template(&self.channel, not_solved_template(&played));
            self.post(reply).await?;
            return Ok(false);
        }

        let optimal = self.puzzle.solution.len();
        round.solve(message.user(), Instant::now())?;
        let comment = solved_comment(optimal, moves);
        self.post(MessagePayload::text(&self.channel, comment)).await?;
        let answer = answer_template(&self.puzzle, &command.moves, None);
        self.post(MessagePayload::from_template(&self.channel, answer)).await?;

        for id in shortest_achievements(optimal, moves) {
            self.ctx.ledger.unlock(message.user(), id).await?;
        }
        self.ctx.ledger.unlock(message.user(), WIN_ACHIEVEMENT).await?;
        info!(
            event_name = "ricochet.battle.won",
            game = GAME,
            channel_id = %self.channel,
            user_id = message.user(),
            moves,
            bid = turn.moves,
            "battle won"
        );
        Ok(true)
    }

    /// Next top-level human message in the battle channel.
    async fn next_message(
        &self,
        inbox: &mut Receiver<MessageEvent>,
    ) -> Result<MessageEvent, QuizError> {
        loop {
            match inbox.recv().await {
                Ok(message) => {
                    if message.channel_id == self.channel
                        && message.thread_ts.is_none()
                        && message.is_plain_user_message()
                    {
                        return Ok(message);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "ricochet.battle.lagged",
                        game = GAME,
                        channel_id = %self.channel,
                        skipped,
                        "battle fell behind; messages in the gap were ignored"
                    );
                }
                Err(RecvError::Closed) => {
                    return Err(QuizError::Aborted("message stream closed".to_string()));
                }
            }
        }
    }

    async fn post(&self, message: MessagePayload) -> Result<PostedMessage, QuizError> {
        let message = message.with_identity(&RicochetRobots::identity());
        Ok(self.ctx.web.post_message(&message).await?)
    }
}

#[cfg(test)]
mod tests {
    use quizbot_slack::MessageEvent;

    use super::{parse_bid, Bid, Bids, Turn, PLAY_ACHIEVEMENT, WIN_ACHIEVEMENT};
    use crate::ricochet::board::fixtures::two_move_board;
    use crate::ricochet::board::{Colour, Direction, Move};
    use crate::ricochet::generator::Puzzle;
    use crate::ricochet::RicochetRobots;
    use crate::testing::{wake, Harness};

    fn two_move_puzzle() -> Puzzle {
        Puzzle {
            board: two_move_board(),
            solution: vec![
                Move::new(Colour::Red, Direction::Right),
                Move::new(Colour::Red, Direction::Down),
            ],
        }
    }

    fn say(user: &str, text: &str, ts: &str) -> MessageEvent {
        MessageEvent { ts: ts.to_string(), ..wake("C1", user, text) }
    }

    fn turn(user: &str, moves: usize) -> Turn {
        Turn { user: user.to_string(), moves }
    }

    #[test]
    fn bids_parse_with_or_without_unit() {
        assert_eq!(parse_bid("5"), Some(5));
        assert_eq!(parse_bid("12手"), Some(12));
        assert_eq!(parse_bid("手"), None);
        assert_eq!(parse_bid("5手詰め"), None);
        assert_eq!(parse_bid("-3"), None);
        assert_eq!(parse_bid("99999999999999999999999999"), None);
    }

    #[test]
    fn bids_order_by_moves_then_time() {
        let mut bids = Bids::default();
        assert!(bids.place("U1", Bid { moves: 5, time: 3.0 }));
        assert!(bids.place("U2", Bid { moves: 3, time: 4.0 }));
        assert!(bids.place("U3", Bid { moves: 3, time: 2.0 }));
        assert!(!bids.place("U1", Bid { moves: 1, time: 1.0 }), "older bid must not replace");
        assert!(bids.place("U4", Bid { moves: 8, time: 5.0 }));
        assert!(bids.place("U4", Bid { moves: 4, time: 6.0 }));

        assert_eq!(
            bids.ordered(),
            vec![turn("U3", 3), turn("U2", 3), turn("U4", 4), turn("U1", 5)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn every_turn_times_out_in_bid_order() {
        let harness = Harness::new();
        let bot = RicochetRobots::new(harness.ctx.clone()).expect("bot");
        let (ticket, join) = bot
            .spawn_battle("C1", "U9", || Some(two_move_puzzle()))
            .expect("gate free");
        ticket.started.wait().await.expect("started");

        harness.publish(say("U1", "赤右", "1600000001.000000"));
        harness.publish(say("U1", "5", "1600000002.000000"));
        harness.publish(say("U2", "3手", "1600000004.000000"));
        harness.publish(say("U3", "3", "1600000003.000000"));
        harness.publish(say("U1", "1", "1600000001.500000"));
        join.await.expect("join");

        let texts = harness.web.post_texts().await;
        assert!(texts[0].starts_with(":question:手詰めです"));
        assert_eq!(texts[1], "今は宣言中だよ:cry:");
        assert!(texts[2].starts_with("宣言終了予定時刻: <!date^"));
        assert!(texts[3].starts_with("<@U3>さんの解答ターンだよ。\n3手以下の手順を"));
        assert_eq!(texts[4], "<@U3>さんは間に合わなかったみたいだね。残念:cry:");
        assert!(texts[5].starts_with("<@U2>さんの解答ターンだよ。\n3手以下"));
        assert_eq!(texts[6], "<@U2>さんは間に合わなかったみたいだね。残念:cry:");
        assert!(texts[7].starts_with("<@U1>さんの解答ターンだよ。\n5手以下"));
        assert_eq!(texts[8], "<@U1>さんは間に合わなかったみたいだね。残念:cry:");
        assert!(texts[9].starts_with("だれも正解できなかったよ:cry:\n正解は 赤右,赤下 の2手だよ。"));
        assert_eq!(texts.len(), 10);

        assert_eq!(harness.web.reactions().await, vec!["ok_hand"; 4]);
        let posts = harness.web.posts().await;
        assert!(posts.iter().all(|post| post.thread_ts.is_none()));
        assert!(posts.iter().all(|post| post.username.as_deref() == Some("hyperrobot")));
        assert_eq!(
            harness.ledger.unlocks().await,
            vec![("U9".to_string(), PLAY_ACHIEVEMENT.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn only_the_current_player_can_win_within_their_bid() {
        let harness = Harness::new();
        let bot = RicochetRobots::new(harness.ctx.clone()).expect("bot");
        let (ticket, join) = bot
            .spawn_battle("C1", "U9", || Some(two_move_puzzle()))
            .expect("gate free");
        ticket.started.wait().await.expect("started");

        harness.publish(say("U1", "2", "1600000001.000000"));
        harness.publish(say("U2", "1", "1600000002.000000"));
        assert!(harness.web.wait_for_posts(3).await);
        let texts = harness.web.post_texts().await;
        assert!(texts[2].starts_with("<@U2>さんの解答ターンだよ。\n1手以下"));

        harness.publish(say("U1", "赤右下", "1600000010.000000"));
        harness.publish(say("U2", "赤右下", "1600000011.000000"));
        assert!(harness.web.wait_for_posts(5).await);
        assert!(harness.web.wait_for_posts(7).await);
        let texts = harness.web.post_texts().await;
        assert_eq!(texts[3], "今は<@U2>さんの解答時間だよ。");
        assert_eq!(texts[4], "<@U2>さんの宣言手数は1手だよ:cry:\nその手は2手かかってるよ。");
        assert_eq!(texts[5], "<@U2>さんは間に合わなかったみたいだね。残念:cry:");
        assert!(texts[6].starts_with("<@U1>さんの解答ターンだよ。\n2手以下"));

        harness.publish(say("U1", "赤右", "1600000100.000000"));
        harness.publish(say("U1", "赤右下", "1600000101.000000"));
        join.await.expect("join");

        let texts = harness.web.post_texts().await;
        assert!(texts[7].contains("解けてませんね:thinking_face:"));
        assert_eq!(texts[8], "正解です!:tada:さらに最短勝利です!:waiwai:");
        assert!(texts[9].starts_with("僕の見つけた手順です。\n赤右,赤下"));
        assert_eq!(texts.len(), 10);

        let unlocks = harness.ledger.unlocks().await;
        assert_eq!(
            unlocks,
            vec![
                ("U9".to_string(), PLAY_ACHIEVEMENT.to_string()),
                ("U1".to_string(), "ricochet-robots-clear-shortest".to_string()),
                ("U1".to_string(), WIN_ACHIEVEMENT.to_string()),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn battle_without_bids_is_abandoned() {
        let harness = Harness::new();
        let bot = RicochetRobots::new(harness.ctx.clone()).expect("bot");
        let (_ticket, join) = bot
            .spawn_battle("C1", "U9", || Some(two_move_puzzle()))
            .expect("gate free");
        join.await.expect("join");

        let texts = harness.web.post_texts().await;
        assert_eq!(texts.len(), 2);
        assert!(texts[1].starts_with("だれも宣言しなかったよ:cry:"));
        assert!(bot.spawn_battle("C1", "U9", || Some(two_move_puzzle())).is_some());
    }
}
