use std::sync::Arc;

use quizbot_core::{StateAchievementLedger, Unlocked};
use quizbot_slack::{BotIdentity, MessagePayload, SlackWebApi};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::warn;

fn identity() -> BotIdentity {
    BotIdentity::new("実績解除", ":achievement:")
}

pub fn unlock_text(unlocked: &Unlocked) -> String {
    let achievement = &unlocked.achievement;
    let mut text = format!(
        "<@{}>が実績【{}】を解除しました:tada::tada::tada:\n_{}_\n難易度{} ({})",
        unlocked.user,
        achievement.title,
        achievement.condition,
        achievement.difficulty.stars(),
        achievement.difficulty.as_str(),
    );
    if unlocked.first_in_workspace {
        text.push_str(" *初達成者!!*");
    }
    text
}

/// Posts every unlock from the ledger to `channel`.
pub fn spawn(
    ledger: &StateAchievementLedger,
    web: Arc<dyn SlackWebApi>,
    channel: String,
) -> JoinHandle<()> {
    let mut unlocks = ledger.subscribe();
    tokio::spawn(async move {
        loop {
            let unlocked = match unlocks.recv().await {
                Ok(unlocked) => unlocked,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(
                        event_name = "achievements.announce.lagged",
                        skipped,
                        "dropped unlock announcements"
                    );
                    continue;
                }
                Err(RecvError::Closed) => return,
            };
            let message = MessagePayload::text(channel.clone(), unlock_text(&unlocked))
                .with_identity(&identity());
            if let Err(error) = web.post_message(&message).await {
                warn!(
                    event_name = "achievements.announce.failed",
                    channel_id = %channel,
                    user_id = %unlocked.user,
                    achievement_id = %unlocked.achievement.id,
                    error = %error,
                    "could not announce unlock"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quizbot_core::{
        AchievementCatalog, AchievementLedger, MemoryStateStore, StateAchievementLedger,
    };
    use quizbot_slack::testing::RecordingWebApi;

    #[tokio::test]
    async fn unlocks_are_posted_with_title_and_first_marker() {
        let catalog = Arc::new(AchievementCatalog::builtin().expect("catalog"));
        let ledger = StateAchievementLedger::load(Arc::new(MemoryStateStore::new()), catalog)
            .await
            .expect("ledger");
        let web = Arc::new(RecordingWebApi::new());
        let task = super::spawn(&ledger, web.clone(), "CSANDBOX".to_string());

        assert!(ledger.unlock("U1", "slowquiz-register-quiz").await.expect("unlock"));
        // the first unlock also earns the collection achievement
        assert!(web.wait_for_posts(2).await);

        let texts = web.post_texts().await;
        assert!(texts[0].contains("<@U1>が実績【出題者】を解除しました"));
        assert!(texts[0].contains("*初達成者!!*"));
        assert!(texts[1].contains("【実績解除】"));
        let posts = web.posts().await;
        assert!(posts.iter().all(|post| post.channel == "CSANDBOX"));
        task.abort();
    }
}
