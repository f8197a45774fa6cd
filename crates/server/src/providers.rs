//! HTTP-backed content for the adapters: word lists, character sheets, image and QR URLs.

use std::time::Duration;

use async_trait::async_trait;
use quizbot_core::config::ContentConfig;
use quizbot_games::content::{
    Author, CharacterSheets, Crop, DictionaryWord, ImageHost, QrImages, QrRenderer, WordSource,
};
use quizbot_games::QuizError;
use reqwest::{Client, Url};
use tracing::debug;

const QR_SERVER_URL: &str = "https://api.qrserver.com/v1/create-qr-code/";

pub struct HttpContent {
    client: Client,
    content: ContentConfig,
}

impl HttpContent {
    pub fn new(content: ContentConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self { client, content })
    }

    async fn fetch_text(&self, url: Option<&str>, what: &str) -> Result<String, QuizError> {
        let url = url.ok_or_else(|| QuizError::content(format!("no url configured for {what}")))?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|error| QuizError::content(format!("{what}: {error}")))?;
        let body =
            response.text().await.map_err(|error| QuizError::content(format!("{what}: {error}")))?;
        debug!(
            event_name = "content.fetched",
            content = what,
            bytes = body.len(),
            "content fetched"
        );
        Ok(body)
    }
}

/// One `word<TAB>reading` or `word,reading` pair per line.
pub fn parse_dictionary(text: &str) -> Vec<DictionaryWord> {
    text.lines()
        .filter_map(|line| line.split_once(['\t', ',']))
        .map(|(word, ruby)| DictionaryWord {
            word: word.trim().to_string(),
            ruby: ruby.trim().to_string(),
        })
        .filter(|entry| !entry.word.is_empty() && !entry.ruby.is_empty())
        .collect()
}

pub fn parse_word_list(text: &str) -> Vec<String> {
    text.lines().map(str::trim).filter(|word| !word.is_empty()).map(str::to_lowercase).collect()
}

#[async_trait]
impl CharacterSheets for HttpContent {
    async fn sheet(&self, author: Author) -> Result<String, QuizError> {
        let url = match author {
            Author::Namori => self.content.namori_characters_url.as_deref(),
            Author::Ixy => self.content.ixy_characters_url.as_deref(),
        };
        self.fetch_text(url, author.as_str()).await
    }
}

#[async_trait]
impl WordSource for HttpContent {
    async fn english_words(&self) -> Result<Vec<String>, QuizError> {
        let text = self.fetch_text(self.content.word_list_url.as_deref(), "word list").await?;
        Ok(parse_word_list(&text))
    }

    async fn japanese_words(&self) -> Result<Vec<DictionaryWord>, QuizError> {
        let text = self
            .fetch_text(self.content.japanese_word_list_url.as_deref(), "japanese word list")
            .await?;
        Ok(parse_dictionary(&text))
    }
}

/// Serves crops through the image CDN's fetch API. Without a cloud name images are used as is.
pub struct CdnImages {
    cloud_name: Option<String>,
}

impl CdnImages {
    pub fn new(cloud_name: Option<String>) -> Self {
        Self { cloud_name }
    }
}

impl ImageHost for CdnImages {
    fn image_url(&self, source: &str, crop: Option<&Crop>) -> String {
        let (Some(cloud_name), Some(crop)) = (&self.cloud_name, crop) else {
            return source.to_string();
        };
        let mut transform = format!(
            "c_crop,fl_relative,w_{:.3},h_{:.3},x_{:.3},y_{:.3}",
            crop.width, crop.height, crop.x, crop.y
        );
        if let Some(pixels) = crop.pixelate {
            transform.push_str(&format!("/e_pixelate:{pixels}"));
        }
        format!("https://res.cloudinary.com/{cloud_name}/image/fetch/{transform}/{source}")
    }
}

/// QR images rendered by a public QR API. The API cannot hide finder patterns, so the quiz
/// image is the plain code.
pub struct QrServer;

impl QrServer {
    fn url(data: &str) -> Result<Url, QuizError> {
        Url::parse_with_params(
            QR_SERVER_URL,
            &[("size", "420x420"), ("qzone", "3"), ("ecc", "L"), ("data", data)],
        )
        .map_err(QuizError::content)
    }
}

#[async_trait]
impl QrRenderer for QrServer {
    async fn render(&self, data: &str, _unmasked: bool) -> Result<QrImages, QuizError> {
        let original = Self::url(data)?.to_string();
        Ok(QrImages { quiz: original.clone(), original })
    }
}

#[cfg(test)]
mod tests {
    use quizbot_games::content::{Crop, ImageHost, QrRenderer};

    use super::{parse_dictionary, parse_word_list, CdnImages, QrServer};

    #[test]
    fn dictionaries_accept_tabs_and_commas() {
        let words = parse_dictionary("猫\tねこ\n林檎,りんご\n壊れた行\n");
        let pairs: Vec<(&str, &str)> =
            words.iter().map(|entry| (entry.word.as_str(), entry.ruby.as_str())).collect();
        assert_eq!(pairs, vec![("猫", "ねこ"), ("林檎", "りんご")]);
        assert_eq!(parse_word_list("The\n\n apple \n"), vec!["the", "apple"]);
    }

    #[test]
    fn crops_go_through_the_cdn_when_configured() {
        let crop = Crop { width: 0.5, height: 0.25, x: 0.1, y: 0.2, pixelate: Some(8) };
        let images = CdnImages::new(Some("quizbot".to_string()));
        assert_eq!(
            images.image_url("https://img.test/a.png", Some(&crop)),
            "https://res.cloudinary.com/quizbot/image/fetch/\
             c_crop,fl_relative,w_0.500,h_0.250,x_0.100,y_0.200/e_pixelate:8/https://img.test/a.png"
        );
        assert_eq!(images.image_url("https://img.test/a.png", None), "https://img.test/a.png");
        assert_eq!(
            CdnImages::new(None).image_url("https://img.test/a.png", Some(&crop)),
            "https://img.test/a.png"
        );
    }

    #[tokio::test]
    async fn qr_urls_encode_their_data() {
        let images = QrServer.render("ふじ さん", false).await.expect("render");
        assert!(images
            .original
            .starts_with("https://api.qrserver.com/v1/create-qr-code/?size=420x420"));
        assert!(images.original.contains("data=%E3%81%B5%E3%81%98+%E3%81%95%E3%82%93"));
        assert_eq!(images.quiz, images.original);
    }
}
