use quizbot_core::DomainError;
use quizbot_slack::blocks::{Block, TextObject};
use quizbot_slack::MessagePayload;

/// Replaced with the winner's user id in solved and incorrect messages, as in `<@[[!user]]>`.
pub const WINNER_PLACEHOLDER: &str = "[[!user]]";

/// Everything one round posts, fixed before the round starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuizProblem {
    pub problem_message: MessagePayload,
    pub hint_messages: Vec<MessagePayload>,
    pub immediate_message: Option<MessagePayload>,
    pub solved_message: MessagePayload,
    pub unsolved_message: MessagePayload,
    pub answer_message: Option<MessagePayload>,
    pub incorrect_message: Option<MessagePayload>,
    pub correct_answers: Vec<String>,
}

impl QuizProblem {
    pub fn new(
        problem_message: MessagePayload,
        solved_message: MessagePayload,
        unsolved_message: MessagePayload,
        correct_answers: Vec<String>,
    ) -> Self {
        Self {
            problem_message,
            hint_messages: Vec::new(),
            immediate_message: None,
            solved_message,
            unsolved_message,
            answer_message: None,
            incorrect_message: None,
            correct_answers,
        }
    }

    pub fn with_hints(mut self, hints: Vec<MessagePayload>) -> Self {
        self.hint_messages = hints;
        self
    }

    pub fn with_immediate(mut self, message: MessagePayload) -> Self {
        self.immediate_message = Some(message);
        self
    }

    pub fn with_answer(mut self, message: MessagePayload) -> Self {
        self.answer_message = Some(message);
        self
    }

    pub fn with_incorrect(mut self, message: MessagePayload) -> Self {
        self.incorrect_message = Some(message);
        self
    }

    pub fn channel(&self) -> &str {
        &self.problem_message.channel
    }

    /// A round needs at least one non-blank answer, and every follow-up goes to the problem's
    /// thread, so every follow-up must target its channel.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.correct_answers.iter().all(|answer| answer.trim().is_empty()) {
            return Err(DomainError::InvariantViolation(
                "problem has no correct answer and could never be solved".to_string(),
            ));
        }

        let channel = self.channel();
        let follow_ups = self
            .hint_messages
            .iter()
            .chain(self.immediate_message.iter())
            .chain([&self.solved_message, &self.unsolved_message])
            .chain(self.answer_message.iter())
            .chain(self.incorrect_message.iter());
        for message in follow_ups {
            if message.channel != channel {
                return Err(DomainError::InvariantViolation(format!(
                    "follow-up message targets `{}` but the problem is posted in `{channel}`",
                    message.channel
                )));
            }
        }
        Ok(())
    }
}

/// Substitutes [`WINNER_PLACEHOLDER`] in the text and every block.
pub fn fill_winner(mut message: MessagePayload, user: &str) -> MessagePayload {
    message.text = message.text.replace(WINNER_PLACEHOLDER, user);
    for block in &mut message.blocks {
        match block {
            Block::Section { text, .. } => replace_in(text, user),
            Block::Context { elements, .. } => {
                elements.iter_mut().for_each(|text| replace_in(text, user))
            }
            Block::Image { .. } => {}
        }
    }
    message
}

fn replace_in(text: &mut TextObject, user: &str) {
    match text {
        TextObject::PlainText { text } | TextObject::Mrkdwn { text } => {
            *text = text.replace(WINNER_PLACEHOLDER, user);
        }
    }
}

pub const TYPICAL_HINT_TEXTS: [&str; 4] = [
    "しょうがないにゃあ、ヒントだよ",
    "もう一つヒントだよ、早く答えてね",
    "まだわからないの？ヒント追加するからね",
    "最後のヒントだよ！もうわかるよね？",
];

/// Stock wording shared by the simpler quizzes.
pub mod typical {
    use super::WINNER_PLACEHOLDER;

    pub fn problem(genre: &str) -> String {
        format!("この{genre}なーんだ")
    }

    pub fn immediate(hint_interval_secs: u64) -> String {
        format!("{hint_interval_secs}秒経過でヒントを出すよ♫")
    }

    pub fn solved(answer: &str) -> String {
        format!("<@{WINNER_PLACEHOLDER}> 正解:tada:\n答えは{answer}だよ:muscle:")
    }

    pub fn unsolved(answer: &str) -> String {
        format!("もう、しっかりして！\n答えは{answer}だよ:anger:")
    }
}

#[cfg(test)]
mod tests {
    use quizbot_slack::{MessageBuilder, MessagePayload};

    use super::{fill_winner, typical, QuizProblem};

    fn problem() -> QuizProblem {
        QuizProblem::new(
            MessagePayload::text("C1", "この実績なーんだ"),
            MessagePayload::text("C1", typical::solved("Foo")),
            MessagePayload::text("C1", typical::unsolved("Foo")),
            vec!["Foo".to_string()],
        )
    }

    #[test]
    fn winner_placeholder_is_filled_in_text_and_blocks() {
        let template = MessageBuilder::new(typical::solved("Foo"))
            .section("solved", |section| {
                section.mrkdwn("<@[[!user]]> おめでとう");
            })
            .build();
        let filled = fill_winner(MessagePayload::from_template("C1", template), "U42");

        assert!(filled.text.starts_with("<@U42> 正解"));
        assert!(filled.all_text().contains("<@U42> おめでとう"));
        assert!(!filled.all_text().contains("[[!user]]"));
    }

    #[test]
    fn follow_ups_must_share_the_problem_channel() {
        assert!(problem().validate().is_ok());

        let stray = problem().with_hints(vec![MessagePayload::text("C2", "hint")]);
        assert!(stray.validate().is_err());
    }

    #[test]
    fn problems_without_a_correct_answer_are_rejected() {
        let mut unanswerable = problem();
        unanswerable.correct_answers.clear();
        let error = unanswerable.validate().expect_err("empty answer set");
        assert!(error.to_string().contains("no correct answer"));

        unanswerable.correct_answers = vec!["  ".to_string()];
        assert!(unanswerable.validate().is_err());
    }
}
