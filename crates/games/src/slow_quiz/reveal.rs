//! Daily reveal of a question: one character a day, or one `/`-separated token a day for
//! questions written as five or more tokens. Text inside `【】` is shown without using up
//! a day.

pub const MAX_QUESTION_LENGTH: usize = 90;
pub const TOKEN_MODE_MIN_TOKENS: usize = 5;

pub const MASK: char = '◯';
/// Joins masked characters so clients do not wrap them as one word.
pub const SEPARATOR: char = '\u{200B}';
const CLOSING_MARKS: [char; 3] = ['。', '？', '?'];

fn tokens(question: &str) -> Option<Vec<&str>> {
    let tokens: Vec<&str> = question.split('/').collect();
    (tokens.len() >= TOKEN_MODE_MIN_TOKENS).then_some(tokens)
}

/// Whether the question is revealed token by token.
pub fn uses_tokens(question: &str) -> bool {
    tokens(question).is_some()
}

fn ends_with_closing_mark(text: &str) -> bool {
    text.chars().last().is_some_and(|ch| CLOSING_MARKS.contains(&ch))
}

fn without_annotations(question: &str) -> String {
    let mut kept = String::new();
    let mut annotated = false;
    for ch in question.chars() {
        match ch {
            '【' if !annotated => annotated = true,
            '】' if annotated => annotated = false,
            _ if !annotated => kept.push(ch),
            _ => {}
        }
    }
    kept
}

pub fn is_valid_question(question: &str) -> bool {
    match tokens(question) {
        Some(tokens) => tokens.len() <= MAX_QUESTION_LENGTH,
        None => without_annotations(question).chars().count() <= MAX_QUESTION_LENGTH,
    }
}

/// Days of progress after which every character is visible. A trailing `。` or `？` is
/// never hidden, so it does not count.
pub fn progress_of_complete(question: &str) -> usize {
    if let Some(tokens) = tokens(question) {
        return tokens.len();
    }
    let counted = without_annotations(question);
    let length = counted.chars().count();
    if ends_with_closing_mark(&counted) {
        length.saturating_sub(1)
    } else {
        length
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Visible {
    pub text: String,
    pub hidden: usize,
}

/// The revealed prefix at `progress`. Empty for token questions.
pub fn visible_text(question: &str, progress: usize) -> Visible {
    if tokens(question).is_some() {
        return Visible::default();
    }
    let mut visible = Visible::default();
    let mut revealed = 0;
    let mut annotated = false;
    for ch in question.chars() {
        if revealed >= progress {
            visible.hidden += 1;
            continue;
        }
        visible.text.push(ch);
        if annotated {
            annotated = ch != '】';
        } else if ch == '【' {
            annotated = true;
        } else {
            revealed += 1;
        }
    }
    visible
}

fn mask_chars(chars: &[char], keep_closing_mark: bool) -> String {
    let last = chars.len().saturating_sub(1);
    chars
        .iter()
        .enumerate()
        .map(|(index, ch)| {
            if keep_closing_mark && index == last && CLOSING_MARKS.contains(ch) {
                ch.to_string()
            } else {
                MASK.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(&SEPARATOR.to_string())
}

/// The question as shown on day `progress`: revealed text, then one mask per hidden
/// character.
pub fn masked_question(question: &str, progress: usize) -> String {
    if let Some(tokens) = tokens(question) {
        let shown = progress.min(tokens.len());
        let visible: String = tokens[..shown].concat();
        let hidden = &tokens[shown..];
        let masked = hidden
            .iter()
            .enumerate()
            .map(|(index, token)| {
                let chars: Vec<char> = token.chars().collect();
                mask_chars(&chars, index + 1 == hidden.len())
            })
            .collect::<Vec<_>>()
            .join("/");
        return format!("{visible}{SEPARATOR}{masked}");
    }

    let visible = visible_text(question, progress);
    let closing = question.chars().last().filter(|ch| CLOSING_MARKS.contains(ch));
    let mut hidden: Vec<char> = vec![MASK; visible.hidden];
    if let (Some(closing), Some(last)) = (closing, hidden.last_mut()) {
        *last = closing;
    }
    let masked =
        hidden.iter().map(char::to_string).collect::<Vec<_>>().join(&SEPARATOR.to_string());
    format!("{}{SEPARATOR}{masked}", visible.text)
}

/// The revealed part of a masked question.
pub fn revealed_part(masked: &str) -> &str {
    masked.split(SEPARATOR).next().unwrap_or(masked)
}

#[cfg(test)]
mod tests {
    use super::{
        is_valid_question, masked_question, progress_of_complete, revealed_part, visible_text,
        Visible,
    };

    fn plain(masked: &str) -> String {
        masked.replace('\u{200B}', "")
    }

    #[test]
    fn characters_are_revealed_one_a_day() {
        let question = "日本一高い山は？";
        assert_eq!(progress_of_complete(question), 7);
        assert_eq!(plain(&masked_question(question, 0)), "◯◯◯◯◯◯◯？");
        assert_eq!(plain(&masked_question(question, 3)), "日本一◯◯◯◯？");
        assert_eq!(plain(&masked_question(question, 7)), "日本一高い山は？");
        assert_eq!(revealed_part(&masked_question(question, 2)), "日本");
    }

    #[test]
    fn annotations_do_not_use_up_days() {
        let question = "【英語】apple";
        assert_eq!(progress_of_complete(question), 5);
        assert_eq!(
            visible_text(question, 1),
            Visible { text: "【英語】a".to_string(), hidden: 4 }
        );
        assert_eq!(plain(&masked_question(question, 1)), "【英語】a◯◯◯◯");
    }

    #[test]
    fn token_questions_reveal_a_token_a_day() {
        let question = "This/is/a/pen/?";
        assert_eq!(progress_of_complete(question), 5);
        assert_eq!(masked_question(question, 2), "Thisis\u{200B}◯/◯\u{200B}◯\u{200B}◯/?");
        assert_eq!(visible_text(question, 2), Visible::default());
    }

    #[test]
    fn long_questions_are_rejected_unless_annotated() {
        let long = "あ".repeat(91);
        assert!(!is_valid_question(&long));
        assert!(is_valid_question(&format!("【{long}】あ")));
        assert!(is_valid_question(&format!("あ{}", "/あ".repeat(89))));
        assert!(!is_valid_question(&format!("あ{}", "/あ".repeat(90))));
    }
}
