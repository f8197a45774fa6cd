//! Move commands such as `赤右下青左` or `rdsまで`.

use crate::ricochet::board::{Colour, Direction, Move};

/// `made` marks a command that does not claim to be shortest (trailing `まで`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub moves: Vec<Move>,
    pub made: bool,
}

pub fn is_command(text: &str) -> bool {
    parse(text).is_some()
}

/// One or more runs of a colour followed by directions, optionally ending in `まで`.
pub fn parse(text: &str) -> Option<Command> {
    let (body, made) = match text.strip_suffix("まで") {
        Some(body) => (body, true),
        None => (text, false),
    };

    let mut moves = Vec::new();
    let mut robot = None;
    let mut run_has_direction = false;
    for ch in body.chars() {
        if let Some(colour) = Colour::from_char(ch) {
            if robot.is_some() && !run_has_direction {
                return None;
            }
            robot = Some(colour);
            run_has_direction = false;
        } else {
            let direction = Direction::from_char(ch)?;
            moves.push(Move::new(robot?, direction));
            run_has_direction = true;
        }
    }
    run_has_direction.then_some(Command { moves, made })
}
