//! Registration and answer validation. Every error's display text is what the user sees.

use quizbot_core::text::{answers_match, is_hiragana, is_katakana};
use thiserror::Error;

/// Answers accepted per game before it closes.
pub const MAX_CORRECT_ANSWERS: usize = 3;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("登録は `/slow-quiz register 問題文 | 答え | よみがな` の形式で入力してね🙄")]
    Format,
    #[error("問題を入力してね🙄")]
    MissingQuestion,
    #[error("答えを入力してね🙄")]
    MissingAnswer,
    #[error("読みがなに使える文字は「ひらがな・カタカナ・英数字」のみだよ🙄")]
    InvalidRuby,
    #[error("問題文の長さは原則90文字以下だよ🙄")]
    QuestionTooLong,
    #[error("ジャンルは「正統派」「変化球」「なんでも」のどれかだよ🙄")]
    UnknownGenre,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum AnswerRejection {
    #[error("Error: 問題が見つかりません")]
    NotFound,
    #[error("開催中の問題が複数あるよ。`/slow-quiz answer <ID> <よみがな>` で指定してね🙄")]
    Ambiguous,
    #[error("出題者は問題に答えることができないよ🙄")]
    Author,
    #[error("Error: この問題の解答受付は終了しています")]
    Closed,
    #[error("Error: この問題にすでに正解しています")]
    AlreadyCorrect,
    #[error("Error: この問題にすでに解答しています")]
    AlreadyAnswered,
    #[error("答えに使える文字は「ひらがな・カタカナ・英数字」のみだよ🙄")]
    InvalidRuby,
}

fn is_ruby_char(ch: char) -> bool {
    is_hiragana(ch) || is_katakana(ch) || ch.is_ascii_alphanumeric()
}

/// A registered reading: kana and ASCII letters or digits, alternatives separated by `,`.
pub fn is_valid_ruby(ruby: &str) -> bool {
    !ruby.is_empty() && ruby.chars().all(|ch| ch == ',' || is_ruby_char(ch))
}

pub fn is_valid_answer(answer: &str) -> bool {
    !answer.is_empty() && answer.chars().all(is_ruby_char)
}

/// Kana-insensitive, case-insensitive comparison against every registered alternative.
pub fn ruby_matches(answer: &str, ruby: &str) -> bool {
    ruby.split(',').any(|accepted| answers_match(answer, accepted))
}

/// Drops everything that could not appear in a reading.
pub fn sanitize_answer(answer: &str) -> String {
    answer.chars().filter(|ch| is_ruby_char(*ch)).collect()
}

#[cfg(test)]
mod tests {
    use super::{is_valid_answer, is_valid_ruby, ruby_matches, sanitize_answer, AnswerRejection};

    #[test]
    fn readings_allow_kana_and_ascii_alternatives() {
        assert!(is_valid_ruby("ふじさん,フジヤマ,fuji3776"));
        assert!(!is_valid_ruby("富士山"));
        assert!(!is_valid_ruby(""));
        assert!(!is_valid_answer("ふじ,さん"));
        assert!(is_valid_answer("フジサン"));
    }

    #[test]
    fn answers_match_any_alternative_ignoring_kana_and_case() {
        assert!(ruby_matches("フジサン", "ふじさん,ふじやま"));
        assert!(ruby_matches("ふじやま", "ふじさん,フジヤマ"));
        assert!(ruby_matches("FUJI", "fuji"));
        assert!(!ruby_matches("ふじ", "ふじさん"));
    }

    #[test]
    fn sanitizing_keeps_reading_characters_only() {
        assert_eq!(sanitize_answer("答えは「ふじさん」です"), "えはふじさんです");
        assert_eq!(sanitize_answer("!!"), "");
    }

    #[test]
    fn rejections_read_as_user_messages() {
        assert_eq!(AnswerRejection::Author.to_string(), "出題者は問題に答えることができないよ🙄");
    }
}
