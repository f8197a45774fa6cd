use serde::Serialize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TextObject {
    PlainText { text: String },
    Mrkdwn { text: String },
}

impl TextObject {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::PlainText { text: text.into() }
    }

    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self::Mrkdwn { text: text.into() }
    }

    pub fn text(&self) -> &str {
        match self {
            Self::PlainText { text } | Self::Mrkdwn { text } => text,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ImageElement {
    #[serde(rename = "type")]
    kind: &'static str,
    pub image_url: String,
    pub alt_text: String,
}

impl ImageElement {
    pub fn new(image_url: impl Into<String>, alt_text: impl Into<String>) -> Self {
        Self { kind: "image", image_url: image_url.into(), alt_text: alt_text.into() }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        text: TextObject,
        #[serde(skip_serializing_if = "Option::is_none")]
        accessory: Option<ImageElement>,
    },
    Image {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        image_url: String,
        alt_text: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        title: Option<TextObject>,
    },
    Context {
        #[serde(skip_serializing_if = "Option::is_none")]
        block_id: Option<String>,
        elements: Vec<TextObject>,
    },
}

/// Text plus blocks, before it is addressed to a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MessageTemplate {
    pub fallback_text: String,
    pub blocks: Vec<Block>,
}

pub struct MessageBuilder {
    fallback_text: String,
    blocks: Vec<Block>,
}

impl MessageBuilder {
    pub fn new(fallback_text: impl Into<String>) -> Self {
        Self { fallback_text: fallback_text.into(), blocks: Vec::new() }
    }

    pub fn section<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut SectionBuilder),
    {
        let mut builder = SectionBuilder::default();
        build(&mut builder);
        let (text, accessory) = builder.build();
        self.blocks.push(Block::Section { block_id: Some(block_id.into()), text, accessory });
        self
    }

    pub fn image(
        mut self,
        block_id: impl Into<String>,
        image_url: impl Into<String>,
        alt_text: impl Into<String>,
    ) -> Self {
        self.blocks.push(Block::Image {
            block_id: Some(block_id.into()),
            image_url: image_url.into(),
            alt_text: alt_text.into(),
            title: None,
        });
        self
    }

    pub fn context<F>(mut self, block_id: impl Into<String>, build: F) -> Self
    where
        F: FnOnce(&mut ContextBuilder),
    {
        let mut builder = ContextBuilder::default();
        build(&mut builder);
        self.blocks
            .push(Block::Context { block_id: Some(block_id.into()), elements: builder.build() });
        self
    }

    pub fn build(self) -> MessageTemplate {
        MessageTemplate { fallback_text: self.fallback_text, blocks: self.blocks }
    }
}

#[derive(Default)]
pub struct SectionBuilder {
    text: Option<TextObject>,
    accessory: Option<ImageElement>,
}

impl SectionBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.text = Some(TextObject::mrkdwn(text));
        self
    }

    pub fn image(
        &mut self,
        image_url: impl Into<String>,
        alt_text: impl Into<String>,
    ) -> &mut Self {
        self.accessory = Some(ImageElement::new(image_url, alt_text));
        self
    }

    fn build(self) -> (TextObject, Option<ImageElement>) {
        (self.text.unwrap_or_else(|| TextObject::plain("")), self.accessory)
    }
}

#[derive(Default)]
pub struct ContextBuilder {
    elements: Vec<TextObject>,
}

impl ContextBuilder {
    pub fn plain(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::plain(text));
        self
    }

    pub fn mrkdwn(&mut self, text: impl Into<String>) -> &mut Self {
        self.elements.push(TextObject::mrkdwn(text));
        self
    }

    fn build(self) -> Vec<TextObject> {
        self.elements
    }
}

/// Display name and icon a game posts under.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BotIdentity {
    pub username: String,
    pub icon_emoji: Option<String>,
    pub icon_url: Option<String>,
}

impl BotIdentity {
    pub fn new(username: impl Into<String>, icon_emoji: impl Into<String>) -> Self {
        Self { username: username.into(), icon_emoji: Some(icon_emoji.into()), icon_url: None }
    }
}

/// A `chat.postMessage` request body.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    pub channel: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub blocks: Vec<Block>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_ts: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub reply_broadcast: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_emoji: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon_url: Option<String>,
    pub unfurl_links: bool,
    pub unfurl_media: bool,
}

impl MessagePayload {
    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self { channel: channel.into(), text: text.into(), ..Self::default() }
    }

    pub fn from_template(channel: impl Into<String>, template: MessageTemplate) -> Self {
        Self {
            channel: channel.into(),
            text: template.fallback_text,
            blocks: template.blocks,
            ..Self::default()
        }
    }

    pub fn in_thread(mut self, thread_ts: impl Into<String>) -> Self {
        self.thread_ts = Some(thread_ts.into());
        self
    }

    pub fn broadcast(mut self) -> Self {
        self.reply_broadcast = true;
        self
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = blocks;
        self
    }

    /// Fills in the identity unless the payload already names one.
    pub fn with_identity(mut self, identity: &BotIdentity) -> Self {
        if self.username.is_none() {
            self.username = Some(identity.username.clone());
            self.icon_emoji = identity.icon_emoji.clone();
            self.icon_url = identity.icon_url.clone();
        }
        self
    }

    /// Text plus any block text, for matching in logs and tests.
    pub fn all_text(&self) -> String {
        let mut combined = self.text.clone();
        for block in &self.blocks {
            let parts: Vec<&str> = match block {
                Block::Section { text, .. } => vec![text.text()],
                Block::Image { alt_text, .. } => vec![alt_text.as_str()],
                Block::Context { elements, .. } => elements.iter().map(TextObject::text).collect(),
            };
            for part in parts {
                combined.push('\n');
                combined.push_str(part);
            }
        }
        combined
    }
}

pub fn error_message(
    channel: &str,
    summary: &str,
    detail: &str,
    correlation_id: &str,
) -> MessagePayload {
    let template = MessageBuilder::new(format!("エラー😢\n{summary}"))
        .section("quiz.error.summary.v1", |section| {
            section.mrkdwn(format!(":warning: エラー😢\n{summary}"));
        })
        .section("quiz.error.detail.v1", |section| {
            section.mrkdwn(format!("```{detail}```"));
        })
        .context("quiz.error.context.v1", |context| {
            context.plain(format!("Correlation ID: {correlation_id}"));
        })
        .build();
    MessagePayload::from_template(channel, template)
}
