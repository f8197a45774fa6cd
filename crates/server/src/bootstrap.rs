use std::path::PathBuf;
use std::sync::Arc;

use quizbot_core::config::{AppConfig, ChannelsConfig};
use quizbot_core::{
    AchievementCatalog, AchievementLedger, FileStateStore, LedgerError, StateAchievementLedger,
    StateStore,
};
use quizbot_games::{
    AchievementQuiz, CharacterQuiz, GameContext, QrcodeQuiz, QuizError, QuizSettings,
    RicochetRobots, SlowQuiz, SlowQuizChannels,
};
use quizbot_slack::events::SlashCommandHandler;
use quizbot_slack::{
    ChannelLimitedBot, EventDispatcher, HttpSlackWebApi, MessageBus, SlackWebApi, WakeWordHandler,
    WebApiError,
};
use thiserror::Error;
use tracing::info;

use crate::providers::{CdnImages, HttpContent, QrServer};

pub struct Application {
    pub config: AppConfig,
    pub store: FileStateStore,
    pub web: Arc<dyn SlackWebApi>,
    pub ledger: Arc<StateAchievementLedger>,
    pub dispatcher: Arc<EventDispatcher>,
    pub slow_quiz: Arc<SlowQuiz>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("could not read achievement catalog `{path}`: {source}")]
    Catalog { path: PathBuf, source: std::io::Error },
    #[error("achievement ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),
    #[error("slack client setup failed: {0}")]
    Slack(#[from] WebApiError),
    #[error("content client setup failed: {0}")]
    Content(#[from] reqwest::Error),
    #[error("game setup failed: {0}")]
    Game(#[from] QuizError),
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let web = HttpSlackWebApi::new(
        config.slack.api_base_url.clone(),
        config.slack.bot_token.clone(),
        config.slack.admin_token.clone(),
    )?;
    assemble(config, Arc::new(web)).await
}

/// Wires state, the achievement ledger and every game around `web`.
pub async fn assemble(
    config: AppConfig,
    web: Arc<dyn SlackWebApi>,
) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        state_dir = %config.storage.state_dir.display(),
        "starting application bootstrap"
    );

    let store = FileStateStore::new(config.storage.state_dir.clone());
    let shared_store: Arc<dyn StateStore> = Arc::new(store.clone());

    let catalog = Arc::new(load_catalog(&config).await?);
    let ledger = Arc::new(
        StateAchievementLedger::load(Arc::clone(&shared_store), Arc::clone(&catalog)).await?,
    );
    info!(
        event_name = "system.bootstrap.ledger_loaded",
        correlation_id = "bootstrap",
        achievements = catalog.len(),
        "achievement ledger loaded"
    );

    let bus = MessageBus::with_capacity(config.quiz.message_bus_capacity);
    let ctx = GameContext::new(
        Arc::clone(&web),
        bus.clone(),
        Arc::clone(&ledger) as Arc<dyn AchievementLedger>,
    )
    .with_settings(QuizSettings::from_config(&config.quiz));

    let content = Arc::new(HttpContent::new(config.content.clone())?);
    let images = Arc::new(CdnImages::new(config.content.image_cloud_name.clone()));

    let mut dispatcher = EventDispatcher::new(bus);
    let achievement_quiz = AchievementQuiz::new(ctx.clone(), Arc::clone(&catalog))?;
    register_gated(&mut dispatcher, achievement_quiz, &web, &config.channels);
    let character_quiz = CharacterQuiz::new(
        ctx.clone(),
        Arc::clone(&content) as _,
        images,
        Arc::clone(&shared_store),
    )
    .await?;
    register_gated(&mut dispatcher, character_quiz, &web, &config.channels);
    let qrcode_quiz = QrcodeQuiz::new(ctx.clone(), Arc::clone(&content) as _, Arc::new(QrServer))?;
    register_gated(&mut dispatcher, qrcode_quiz, &web, &config.channels);
    register_gated(&mut dispatcher, RicochetRobots::new(ctx.clone())?, &web, &config.channels);

    let slow_quiz = Arc::new(
        SlowQuiz::new(ctx, shared_store, SlowQuizChannels::from_config(&config.channels)).await?,
    );
    dispatcher.register(SlashCommandHandler::new().with_service(Arc::clone(&slow_quiz) as _));

    info!(
        event_name = "system.bootstrap.ready",
        correlation_id = "bootstrap",
        handlers = dispatcher.handler_count(),
        "event handlers registered"
    );

    Ok(Application {
        config,
        store,
        web,
        ledger,
        dispatcher: Arc::new(dispatcher),
        slow_quiz,
    })
}

/// Wake words only run in the game channels; progress notes go to the sandbox.
fn register_gated<H>(
    dispatcher: &mut EventDispatcher,
    handler: H,
    web: &Arc<dyn SlackWebApi>,
    channels: &ChannelsConfig,
) where
    H: WakeWordHandler + 'static,
{
    dispatcher.register(ChannelLimitedBot::new(
        handler,
        Arc::clone(web),
        channels.allowed_game_channels(),
        channels.sandbox.clone(),
    ));
}

async fn load_catalog(config: &AppConfig) -> Result<AchievementCatalog, BootstrapError> {
    let Some(path) = &config.content.achievement_catalog_path else {
        return Ok(AchievementCatalog::builtin()?);
    };
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| BootstrapError::Catalog { path: path.clone(), source })?;
    Ok(AchievementCatalog::from_json(&raw)?)
}
