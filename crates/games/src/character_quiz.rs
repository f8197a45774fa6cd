//! キャラ当てクイズ: name the character from progressively larger crops of a drawing.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::text::normalize_loose;
use quizbot_core::{Gate, PluginState, StateStore};
use quizbot_slack::{
    BotIdentity, MessageBuilder, MessageEvent, MessagePayload, WakeError, WakeResponse,
    WakeWordHandler,
};
use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::atequiz::{
    typical, AteQuiz, HintTiming, QuizOutcome, QuizProblem, QuizRules, StartMode, Verdict,
    TYPICAL_HINT_TEXTS,
};
use crate::content::{Author, CharacterSheets, Crop, ImageHost, Loader};
use crate::context::GameContext;
use crate::error::QuizError;
use crate::session::{launch, RoundTicket};

pub const GAME: &str = "character-quiz";
pub const STATE_KEY: &str = "character-quiz";
const PROMPT: &str = "このキャラだーれだ";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Character {
    pub tweet_id: String,
    pub media_id: String,
    pub image_url: String,
    pub name: String,
    pub work: String,
    pub valid_answers: Vec<String>,
    pub author: Author,
    pub rating: String,
    /// Name and work joined by NUL; the same character drawn twice shares it.
    pub id: String,
}

/// Parses an annotation sheet, keeping only rows rated `0`.
///
/// Columns: tweet id, media id, image url, names, rubies, work, rating. Several characters
/// in one drawing are separated by `、` or `&`; given and family names by a space.
pub fn parse_sheet(author: Author, csv: &str) -> Vec<Character> {
    csv.lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| parse_row(author, line))
        .filter(|character| character.rating == "0")
        .collect()
}

fn parse_row(author: Author, line: &str) -> Option<Character> {
    let columns: Vec<&str> = line.split(',').collect();
    if columns.len() < 6 {
        return None;
    }
    let (tweet_id, media_id, image_url, names, rubies, work) =
        (columns[0], columns[1], columns[2], columns[3], columns[4], columns[5]);
    let rating = columns.get(6).map(|rating| rating.trim()).unwrap_or("0");

    let split = |value: &str| -> Vec<String> {
        value.split(['、', '&']).map(str::to_string).collect()
    };
    let character_names = split(names);
    let all_names: Vec<String> = character_names.iter().cloned().chain(split(rubies)).collect();
    let parts: Vec<Vec<&str>> = all_names.iter().map(|name| name.split(' ').collect()).collect();

    let work = work.strip_prefix('"').and_then(|work| work.strip_suffix('"')).unwrap_or(work);
    let joined: Vec<String> = parts.iter().map(|name| name.concat()).collect();
    let mut valid_answers = joined.clone();
    valid_answers.extend(parts.iter().flatten().map(|part| part.to_string()));

    Some(Character {
        tweet_id: tweet_id.to_string(),
        media_id: media_id.to_string(),
        image_url: image_url.to_string(),
        name: character_names.first()?.replace(' ', ""),
        work: work.to_string(),
        valid_answers,
        author,
        rating: rating.to_string(),
        id: format!("{}\0{work}", joined.first()?),
    })
}

#[derive(Clone, Debug, Default)]
pub struct CharacterRules {
    pub timing: HintTiming,
}

#[async_trait]
impl QuizRules for CharacterRules {
    fn wait(&self, hint_index: usize, hint_count: usize) -> Option<Duration> {
        Some(self.timing.wait(hint_index, hint_count))
    }

    fn judge(&self, problem: &QuizProblem, answer: &str, _user: &str) -> Verdict {
        let answer = normalize_loose(answer);
        if problem.correct_answers.iter().any(|expected| normalize_loose(expected) == answer) {
            Verdict::Correct
        } else {
            Verdict::incorrect()
        }
    }
}

/// Crop for hint stage `stage`; stage 0 is the problem image itself.
pub fn hint_crop(stage: usize, rng: &mut impl Rng) -> Crop {
    let mut offset = |size: f64| -> f64 { rng.gen_range(0.0..=(1.0 - size)) };
    match stage {
        0 => Crop { width: 1.0, height: 0.01, x: 0.0, y: offset(0.01), pixelate: None },
        1 => Crop { width: 0.04, height: 0.04, x: offset(0.04), y: offset(0.04), pixelate: None },
        2 => Crop { width: 0.2, height: 0.2, x: offset(0.2), y: offset(0.2), pixelate: Some(10) },
        3 => Crop { width: 0.2, height: 0.2, x: offset(0.2), y: offset(0.2), pixelate: None },
        _ => Crop { width: 1.0, height: 0.5, x: 0.0, y: offset(0.5), pixelate: None },
    }
}

pub fn build_problem(
    character: &Character,
    channel: &str,
    images: &dyn ImageHost,
    timing: HintTiming,
) -> QuizProblem {
    let mut rng = rand::thread_rng();
    let source = character.image_url.as_str();

    let problem = MessageBuilder::new(PROMPT)
        .section("character.problem", |section| {
            section.plain(PROMPT);
        })
        .image("image", images.image_url(source, Some(&hint_crop(0, &mut rng))), PROMPT)
        .build();

    let hints = TYPICAL_HINT_TEXTS
        .iter()
        .enumerate()
        .map(|(index, text)| {
            let crops: Vec<Crop> = if index == 0 {
                (0..3).map(|_| hint_crop(1, &mut rng)).collect()
            } else {
                vec![hint_crop(index + 1, &mut rng)]
            };
            let builder = MessageBuilder::new(*text).section("hint", |section| {
                section.plain(*text);
            });
            let template = crops
                .iter()
                .enumerate()
                .fold(builder, |builder, (position, crop)| {
                    let url = images.image_url(source, Some(crop));
                    builder.image(format!("image-{position}"), url, *text)
                })
                .build();
            MessagePayload::from_template(channel, template)
        })
        .collect();

    let label = format!("＊{}＊ ({})", character.name, character.work);
    let answer = MessageBuilder::new(character.name.clone())
        .section("character.source", |section| {
            section.mrkdwn(format!(
                "https://twitter.com/{}/status/{}",
                character.author.twitter_id(),
                character.tweet_id
            ));
        })
        .image("image", images.image_url(source, None), character.name.clone())
        .build();
    let mut answer = MessagePayload::from_template(channel, answer);
    answer.unfurl_links = true;
    answer.unfurl_media = true;

    QuizProblem::new(
        MessagePayload::from_template(channel, problem),
        MessagePayload::text(channel, typical::solved(&label)).broadcast(),
        MessagePayload::text(channel, typical::unsolved(&label)).broadcast(),
        character.valid_answers.clone(),
    )
    .with_hints(hints)
    .with_immediate(MessagePayload::text(
        channel,
        typical::immediate(timing.hint_interval.as_secs()),
    ))
    .with_answer(answer)
}

/// Counters earned by the winner; `hint_index` is how many hints were shown.
pub fn answer_counters(author: Author, hint_index: usize) -> Vec<String> {
    let mut counters = Vec::new();
    for prefix in ["chara-ate".to_string(), author.as_str().to_string()] {
        counters.push(format!("{prefix}-answer"));
        if hint_index == 0 {
            counters.push(format!("{prefix}-answer-first-hint"));
        }
        if hint_index <= 1 {
            counters.push(format!("{prefix}-answer-second-hint"));
        }
        if hint_index <= 2 {
            counters.push(format!("{prefix}-answer-third-hint"));
        }
    }
    counters
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterQuizState {
    #[serde(default)]
    pub recent_character_ids: Vec<String>,
}

/// Per-author character lists, fetched on first use.
pub struct CharacterCatalog {
    sheets: Arc<dyn CharacterSheets>,
    namori: Loader<Vec<Character>>,
    ixy: Loader<Vec<Character>>,
}

impl CharacterCatalog {
    pub fn new(sheets: Arc<dyn CharacterSheets>) -> Self {
        Self { sheets, namori: Loader::new(), ixy: Loader::new() }
    }

    pub async fn characters(&self, author: Author) -> Result<Arc<Vec<Character>>, QuizError> {
        let loader = match author {
            Author::Namori => &self.namori,
            Author::Ixy => &self.ixy,
        };
        loader
            .load(|| async {
                let sheet = self.sheets.sheet(author).await?;
                let characters = parse_sheet(author, &sheet);
                debug!(
                    event_name = "quiz.content.characters_loaded",
                    author = author.as_str(),
                    count = characters.len(),
                    "character sheet loaded"
                );
                Ok(characters)
            })
            .await
    }
}

fn authors_for(wake_text: &str) -> &'static [Author] {
    match wake_text {
        "なもり当てクイズ" => &[Author::Namori],
        "Ixy当てクイズ" => &[Author::Ixy],
        _ => &[Author::Namori, Author::Ixy],
    }
}

/// Picks a character whose id is not among the recent ones. Once every id is recent, all
/// of them qualify again.
pub fn choose_character<'a>(
    characters: &'a [Character],
    recent: &[String],
    rng: &mut impl Rng,
) -> Option<&'a Character> {
    let ids: BTreeSet<&str> = characters.iter().map(|character| character.id.as_str()).collect();
    let fresh: Vec<&str> =
        ids.iter().copied().filter(|id| !recent.iter().any(|seen| seen == id)).collect();
    let pool: Vec<&str> = if fresh.is_empty() { ids.into_iter().collect() } else { fresh };
    let id = *pool.choose(rng)?;
    let drawings: Vec<&Character> =
        characters.iter().filter(|character| character.id == id).collect();
    drawings.choose(rng).copied()
}

struct Shared {
    ctx: GameContext,
    catalog: CharacterCatalog,
    images: Arc<dyn ImageHost>,
    state: PluginState<CharacterQuizState>,
}

pub struct CharacterQuiz {
    shared: Arc<Shared>,
    gate: Gate,
    wake_word: Regex,
}

impl CharacterQuiz {
    pub async fn new(
        ctx: GameContext,
        sheets: Arc<dyn CharacterSheets>,
        images: Arc<dyn ImageHost>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self, QuizError> {
        let state = PluginState::load(store, STATE_KEY).await?;
        Ok(Self {
            shared: Arc::new(Shared { ctx, catalog: CharacterCatalog::new(sheets), images, state }),
            gate: Gate::new(),
            wake_word: Regex::new("^(?:キャラ|なもり|Ixy)当てクイズ$")?,
        })
    }

    pub fn identity() -> BotIdentity {
        BotIdentity::new("namori", ":namori:")
    }

    pub fn start_round(
        &self,
        wake_text: &str,
        channel: &str,
    ) -> Option<(RoundTicket, JoinHandle<()>)> {
        let guard = self.gate.try_acquire()?;
        let shared = Arc::clone(&self.shared);
        let authors = authors_for(wake_text);
        let channel_owned = channel.to_string();

        Some(launch(Arc::clone(&self.shared.ctx.web), GAME, channel, move |started| async move {
            let _guard = guard;
            let mut characters = Vec::new();
            for author in authors {
                characters.extend(shared.catalog.characters(*author).await?.iter().cloned());
            }

            let limit = shared.ctx.settings.recent_history_limit;
            let recent = shared.state.read(|state| state.recent_character_ids.clone()).await;
            let character = choose_character(&characters, &recent, &mut rand::thread_rng())
                .cloned()
                .ok_or_else(|| QuizError::content("no characters available"))?;
            shared
                .state
                .mutate(|state| {
                    state.recent_character_ids.push(character.id.clone());
                    let overflow = state.recent_character_ids.len().saturating_sub(limit);
                    state.recent_character_ids.drain(..overflow);
                })
                .await?;

            let timing = shared.ctx.settings.timing;
            let problem = build_problem(&character, &channel_owned, shared.images.as_ref(), timing);
            let rules = CharacterRules { timing };
            let web = Arc::clone(&shared.ctx.web);
            let outcome = AteQuiz::new(web, shared.ctx.bus.clone(), problem, rules)
                .with_identity(Self::identity())
                .with_tick(shared.ctx.settings.tick)
                .with_started(started)
                .start(StartMode::Normal)
                .await?;
            record(&shared.ctx, &character, &outcome).await
        }))
    }
}

async fn record(
    ctx: &GameContext,
    character: &Character,
    outcome: &QuizOutcome,
) -> Result<(), QuizError> {
    let Some(winner) = outcome.correct_answerer.as_deref() else {
        return Ok(());
    };
    ctx.increment_all(winner, &answer_counters(character.author, outcome.hint_index)).await?;
    info!(
        event_name = "quiz.achievements.recorded",
        game = GAME,
        user_id = winner,
        hint_index = outcome.hint_index,
        "achievements recorded"
    );
    Ok(())
}

#[async_trait]
impl WakeWordHandler for CharacterQuiz {
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
        match self.start_round(message.text(), channel) {
            Some((ticket, _join)) => Ok(ticket.wake_response().await),
            None => {
                self.shared.ctx.notify_busy(message).await;
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use quizbot_core::{MemoryStateStore, StateStore};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::{
        answer_counters, choose_character, parse_sheet, CharacterQuiz, CharacterRules, STATE_KEY,
    };
    use crate::atequiz::{QuizRules, Verdict};
    use crate::content::fakes::{EchoImages, StaticSheets};
    use crate::content::Author;
    use crate::testing::{answer, Harness};

    const SHEET: &str = "tweetId,mediaId,imageUrl,characterName,characterRuby,workName,rating
1,10,https://img.test/1.jpg,歳納 京子,としのう きょうこ,ゆるゆり,0
2,20,https://img.test/2.jpg,赤座 あかり&吉川 ちなつ,あかざ あかり&よしかわ ちなつ,\"ゆるゆり\",0
3,30,https://img.test/3.jpg,秘密 キャラ,ひみつ きゃら,ゆるゆり,1
";

    #[test]
    fn sheet_rows_expand_into_name_parts() {
        let characters = parse_sheet(Author::Namori, SHEET);
        assert_eq!(characters.len(), 2);

        let kyoko = &characters[0];
        assert_eq!(kyoko.name, "歳納京子");
        assert_eq!(kyoko.id, "歳納京子\0ゆるゆり");
        for expected in ["歳納京子", "としのうきょうこ", "京子", "きょうこ"] {
            assert!(kyoko.valid_answers.iter().any(|answer| answer == expected), "{expected}");
        }

        let pair = &characters[1];
        assert_eq!(pair.work, "ゆるゆり");
        assert_eq!(pair.name, "赤座あかり");
        assert!(pair.valid_answers.iter().any(|answer| answer == "ちなつ"));
    }

    #[test]
    fn judge_ignores_spaces_and_kana_script() {
        let characters = parse_sheet(Author::Namori, SHEET);
        let problem = super::build_problem(&characters[0], "C1", &EchoImages, Default::default());
        let rules = CharacterRules::default();

        assert_eq!(rules.judge(&problem, "キョウコ", "U1"), Verdict::Correct);
        assert_eq!(rules.judge(&problem, "歳納 京子!", "U1"), Verdict::Correct);
        assert_eq!(rules.judge(&problem, "あかり", "U1"), Verdict::incorrect());
        assert_eq!(problem.hint_messages.len(), 4);
    }

    #[test]
    fn recent_characters_are_skipped_until_exhausted() {
        let characters = parse_sheet(Author::Namori, SHEET);
        let mut rng = StdRng::seed_from_u64(7);
        let recent = vec![characters[0].id.clone()];
        for _ in 0..10 {
            let picked = choose_character(&characters, &recent, &mut rng).expect("picked");
            assert_eq!(picked.id, characters[1].id);
        }

        let everything: Vec<String> =
            characters.iter().map(|character| character.id.clone()).collect();
        assert!(choose_character(&characters, &everything, &mut rng).is_some());
        assert!(choose_character(&[], &[], &mut rng).is_none());
    }

    #[test]
    fn hint_counters_accumulate_for_early_answers() {
        let counters = answer_counters(Author::Ixy, 1);
        assert!(counters.contains(&"chara-ate-answer".to_string()));
        assert!(counters.contains(&"ixy-answer-second-hint".to_string()));
        assert!(!counters.contains(&"ixy-answer-first-hint".to_string()));
        assert_eq!(answer_counters(Author::Namori, 3).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn solved_round_records_history_and_counters() {
        let harness = Harness::new();
        let store = Arc::new(MemoryStateStore::new());
        let quiz = CharacterQuiz::new(
            harness.ctx.clone(),
            Arc::new(StaticSheets(SHEET)),
            Arc::new(EchoImages),
            store.clone(),
        )
        .await
        .expect("quiz");

        let (ticket, join) = quiz.start_round("なもり当てクイズ", "C1").expect("gate free");
        let posted = ticket.started.wait().await.expect("started");

        let recent = store.load(STATE_KEY).await.expect("load").expect("saved");
        let id = recent["recent_character_ids"][0].as_str().expect("id").to_string();
        let reply = if id.starts_with("歳納") { "京子" } else { "あかり" };

        tokio::time::sleep(Duration::from_secs(20)).await;
        harness.publish(answer("C1", &posted.ts, "U1", reply));
        join.await.expect("join");

        assert!(harness.ledger.counted("U1", "chara-ate-answer").await);
        assert!(harness.ledger.counted("U1", "namori-answer-second-hint").await);
        assert!(!harness.ledger.counted("U1", "chara-ate-answer-first-hint").await);
    }
}
