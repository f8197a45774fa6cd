//! Content providers the adapters pull from, plus a load-once cache in front of them.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;

use crate::error::QuizError;

/// Loads a value on first use and shares it afterwards. A failed load is retried next time.
pub struct Loader<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> Default for Loader<T> {
    fn default() -> Self {
        Self { cell: OnceCell::new() }
    }
}

impl<T> Loader<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn load<F, Fut>(&self, init: F) -> Result<Arc<T>, QuizError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, QuizError>>,
    {
        self.cell
            .get_or_try_init(|| async { init().await.map(Arc::new) })
            .await
            .map(Arc::clone)
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Author {
    Namori,
    Ixy,
}

impl Author {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Namori => "namori",
            Self::Ixy => "ixy",
        }
    }

    /// Account that posted the original drawings.
    pub fn twitter_id(self) -> &'static str {
        match self {
            Self::Namori => "_namori_",
            Self::Ixy => "Ixy",
        }
    }
}

#[async_trait]
pub trait CharacterSheets: Send + Sync {
    /// Raw CSV with a header row.
    async fn sheet(&self, author: Author) -> Result<String, QuizError>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DictionaryWord {
    pub word: String,
    pub ruby: String,
}

#[async_trait]
pub trait WordSource: Send + Sync {
    /// Lowercase English words, most frequent first.
    async fn english_words(&self) -> Result<Vec<String>, QuizError>;

    async fn japanese_words(&self) -> Result<Vec<DictionaryWord>, QuizError>;
}

/// A crop relative to the source image size, each value in `0.0..=1.0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Crop {
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub pixelate: Option<u32>,
}

pub trait ImageHost: Send + Sync {
    /// Publicly reachable URL for `source`, cropped when `crop` is set.
    fn image_url(&self, source: &str, crop: Option<&Crop>) -> String;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QrImages {
    pub quiz: String,
    pub original: String,
}

#[async_trait]
pub trait QrRenderer: Send + Sync {
    async fn render(&self, data: &str, unmasked: bool) -> Result<QrImages, QuizError>;
}

#[cfg(test)]
pub(crate) mod fakes {
    use async_trait::async_trait;

    use super::{
        Author, CharacterSheets, Crop, DictionaryWord, ImageHost, QrImages, QrRenderer, WordSource,
    };
    use crate::error::QuizError;

    const EMPTY_SHEET: &str =
        "tweetId,mediaId,imageUrl,characterName,characterRuby,workName,rating\n";

    pub(crate) struct StaticSheets(pub &'static str);

    #[async_trait]
    impl CharacterSheets for StaticSheets {
        async fn sheet(&self, author: Author) -> Result<String, QuizError> {
            match author {
                Author::Namori => Ok(self.0.to_string()),
                Author::Ixy => Ok(EMPTY_SHEET.to_string()),
            }
        }
    }

    pub(crate) struct StaticWords;

    #[async_trait]
    impl WordSource for StaticWords {
        async fn english_words(&self) -> Result<Vec<String>, QuizError> {
            Ok(["cat", "dog", "house", "elephant", "understanding"].map(str::to_string).to_vec())
        }

        async fn japanese_words(&self) -> Result<Vec<DictionaryWord>, QuizError> {
            Ok([("猫", "ねこ"), ("林檎", "りんご"), ("富士山", "ふじさん")]
                .map(|(word, ruby)| DictionaryWord {
                    word: word.to_string(),
                    ruby: ruby.to_string(),
                })
                .to_vec())
        }
    }

    pub(crate) struct EchoImages;

    impl ImageHost for EchoImages {
        fn image_url(&self, source: &str, crop: Option<&Crop>) -> String {
            match crop {
                Some(crop) => format!("{source}#{:.2}x{:.2}", crop.width, crop.height),
                None => source.to_string(),
            }
        }
    }

    pub(crate) struct EchoQr;

    #[async_trait]
    impl QrRenderer for EchoQr {
        async fn render(&self, data: &str, unmasked: bool) -> Result<QrImages, QuizError> {
            let original = format!("https://qr.test/{data}");
            let quiz = if unmasked { original.clone() } else { format!("{original}?masked") };
            Ok(QrImages { quiz, original })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::Loader;
    use crate::error::QuizError;

    #[tokio::test]
    async fn loader_caches_success_and_retries_failure() {
        let loader = Loader::<Vec<u8>>::new();
        let calls = AtomicUsize::new(0);

        let failed = loader
            .load(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(QuizError::content("offline"))
            })
            .await;
        assert!(failed.is_err());
        assert!(!loader.is_loaded());

        for _ in 0..2 {
            let loaded = loader
                .load(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .await
                .expect("loaded");
            assert_eq!(*loaded, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
