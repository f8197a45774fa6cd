//! Board model: walls between cells, four robots that slide until blocked, one goal.

use std::fmt::Write as _;

pub const ROBOT_COUNT: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub x: usize,
    pub y: usize,
}

impl Position {
    pub const fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Colour {
    Red,
    Green,
    Blue,
    Yellow,
}

impl Colour {
    pub const ALL: [Colour; ROBOT_COUNT] =
        [Colour::Red, Colour::Green, Colour::Blue, Colour::Yellow];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Colour::Red => "赤",
            Colour::Green => "緑",
            Colour::Blue => "青",
            Colour::Yellow => "黄",
        }
    }

    pub fn letter(self) -> char {
        match self {
            Colour::Red => 'R',
            Colour::Green => 'G',
            Colour::Blue => 'B',
            Colour::Yellow => 'Y',
        }
    }

    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            '赤' | 'r' => Some(Colour::Red),
            '緑' | 'g' => Some(Colour::Green),
            '青' | 'b' => Some(Colour::Blue),
            '黄' | 'y' => Some(Colour::Yellow),
            _ => None,
        }
    }
}

/// Screen directions; `y` grows downwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Down,
    Right,
    Up,
    Left,
}

impl Direction {
    pub const ALL: [Direction; 4] =
        [Direction::Down, Direction::Right, Direction::Up, Direction::Left];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Direction::Down => "下",
            Direction::Right => "右",
            Direction::Up => "上",
            Direction::Left => "左",
        }
    }

    /// Kanji, WASD and vi keys.
    pub fn from_char(ch: char) -> Option<Self> {
        match ch {
            '下' | 's' | 'j' => Some(Direction::Down),
            '右' | 'd' | 'l' => Some(Direction::Right),
            '上' | 'w' | 'k' => Some(Direction::Up),
            '左' | 'a' | 'h' => Some(Direction::Left),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Move {
    pub robot: Colour,
    pub direction: Direction,
}

impl Move {
    pub const fn new(robot: Colour, direction: Direction) -> Self {
        Self { robot, direction }
    }
}

/// `赤下,青左,...`
pub fn describe_moves(moves: &[Move]) -> String {
    moves
        .iter()
        .map(|step| format!("{}{}", step.robot.name(), step.direction.name()))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WallSide {
    /// Between `(x, y - 1)` and `(x, y)`.
    Above,
    /// Between `(x - 1, y)` and `(x, y)`.
    Left,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Wall {
    pub position: Position,
    pub side: WallSide,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Goal {
    pub robot: Colour,
    pub position: Position,
}

pub type Robots = [Position; ROBOT_COUNT];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Board {
    width: usize,
    height: usize,
    blocked: Vec<[bool; 4]>,
    robots: Robots,
    goal: Goal,
}

impl Board {
    /// An empty board with its border walled off.
    pub fn new(width: usize, height: usize, robots: Robots, goal: Goal) -> Self {
        let mut blocked = vec![[false; 4]; width * height];
        for y in 0..height {
            for x in 0..width {
                let sides = &mut blocked[y * width + x];
                sides[Direction::Down.index()] = y + 1 == height;
                sides[Direction::Right.index()] = x + 1 == width;
                sides[Direction::Up.index()] = y == 0;
                sides[Direction::Left.index()] = x == 0;
            }
        }
        Self { width, height, blocked, robots, goal }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn robots(&self) -> &Robots {
        &self.robots
    }

    pub fn robot(&self, colour: Colour) -> Position {
        self.robots[colour.index()]
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn set_goal(&mut self, goal: Goal) {
        self.goal = goal;
    }

    pub fn set_robots(&mut self, robots: Robots) {
        self.robots = robots;
    }

    /// Walls on the border are ignored; they are always present.
    pub fn add_wall(&mut self, wall: Wall) {
        let Position { x, y } = wall.position;
        if x >= self.width || y >= self.height {
            return;
        }
        match wall.side {
            WallSide::Above if y > 0 => {
                self.blocked[(y - 1) * self.width + x][Direction::Down.index()] = true;
                self.blocked[y * self.width + x][Direction::Up.index()] = true;
            }
            WallSide::Left if x > 0 => {
                self.blocked[y * self.width + x - 1][Direction::Right.index()] = true;
                self.blocked[y * self.width + x][Direction::Left.index()] = true;
            }
            _ => {}
        }
    }

    pub fn is_blocked(&self, position: Position, direction: Direction) -> bool {
        self.blocked[position.y * self.width + position.x][direction.index()]
    }

    pub fn open_sides(&self, position: Position) -> usize {
        Direction::ALL.iter().filter(|direction| !self.is_blocked(position, **direction)).count()
    }

    /// The neighbouring cell, ignoring robots.
    pub fn step(&self, position: Position, direction: Direction) -> Option<Position> {
        if self.is_blocked(position, direction) {
            return None;
        }
        let Position { x, y } = position;
        Some(match direction {
            Direction::Down => Position::new(x, y + 1),
            Direction::Right => Position::new(x + 1, y),
            Direction::Up => Position::new(x, y - 1),
            Direction::Left => Position::new(x - 1, y),
        })
    }

    /// Where `colour` stops when pushed in `direction` with the robots at `robots`.
    pub fn slide(&self, robots: &Robots, colour: Colour, direction: Direction) -> Position {
        let mut current = robots[colour.index()];
        while let Some(next) = self.step(current, direction) {
            if robots.contains(&next) {
                break;
            }
            current = next;
        }
        current
    }

    pub fn apply(&mut self, step: Move) {
        let stop = self.slide(&self.robots, step.robot, step.direction);
        self.robots[step.robot.index()] = stop;
    }

    pub fn apply_all(&mut self, moves: &[Move]) {
        for step in moves {
            self.apply(*step);
        }
    }

    pub fn is_cleared(&self) -> bool {
        self.robot(self.goal.robot) == self.goal.position
    }

    /// Every cell is reachable from the top-left corner walking through open sides.
    pub fn is_connected(&self) -> bool {
        let mut seen = vec![false; self.width * self.height];
        let mut stack = vec![Position::new(0, 0)];
        seen[0] = true;
        let mut count = 1;
        while let Some(position) = stack.pop() {
            for direction in Direction::ALL {
                if let Some(next) = self.step(position, direction) {
                    let index = next.y * self.width + next.x;
                    if !seen[index] {
                        seen[index] = true;
                        count += 1;
                        stack.push(next);
                    }
                }
            }
        }
        count == self.width * self.height
    }

    /// Text art for a code block. Robots are `R G B Y`; the goal cell carries `*`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for y in 0..self.height {
            for x in 0..self.width {
                let walled = self.is_blocked(Position::new(x, y), Direction::Up);
                let edge = if walled { "---" } else { "   " };
                let _ = write!(out, "+{edge}");
            }
            out.push_str("+\n");
            for x in 0..self.width {
                let position = Position::new(x, y);
                out.push(if self.is_blocked(position, Direction::Left) { '|' } else { ' ' });
                let robot = Colour::ALL
                    .iter()
                    .find(|colour| self.robot(**colour) == position)
                    .map_or(' ', |colour| colour.letter());
                let goal = if self.goal.position == position { '*' } else { ' ' };
                let _ = write!(out, "{robot}{goal} ");
            }
            out.push_str("|\n");
        }
        for x in 0..self.width {
            let edge = if self.is_blocked(Position::new(x, self.height - 1), Direction::Down) {
                "---"
            } else {
                "   "
            };
            let _ = write!(out, "+{edge}");
        }
        out.push('+');
        out
    }

    /// One-line legend naming the robot that must reach the goal.
    pub fn goal_legend(&self) -> String {
        format!("{}のロボット({})を * のマスへ", self.goal.robot.name(), self.goal.robot.letter())
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::{Board, Colour, Goal, Position, Wall, WallSide};

    /// A 5x3 board whose shortest solution is `赤右,赤下`.
    ///
    /// ```text
    /// +---+---+---+---+---+
    /// |R              |   |
    /// +   +   +   +   +   +
    /// |G       B          |
    /// +   +   +   +   +   +
    /// |             *  Y  |
    /// +---+---+---+---+---+
    /// ```
    pub(crate) fn two_move_board() -> Board {
        let robots =
            [Position::new(0, 0), Position::new(0, 1), Position::new(2, 1), Position::new(4, 2)];
        let goal = Goal { robot: Colour::Red, position: Position::new(3, 2) };
        let mut board = Board::new(5, 3, robots, goal);
        board.add_wall(Wall { position: Position::new(4, 0), side: WallSide::Left });
        board
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::two_move_board;
    use super::{describe_moves, Board, Colour, Direction, Goal, Move, Position, Wall, WallSide};

    #[test]
    fn robots_slide_until_a_wall_or_another_robot() {
        let board = two_move_board();
        let robots = *board.robots();

        assert_eq!(board.slide(&robots, Colour::Red, Direction::Right), Position::new(3, 0));
        assert_eq!(board.slide(&robots, Colour::Red, Direction::Down), Position::new(0, 0));
        assert_eq!(board.slide(&robots, Colour::Green, Direction::Right), Position::new(1, 1));
        assert_eq!(board.slide(&robots, Colour::Blue, Direction::Up), Position::new(2, 0));
        assert_eq!(board.slide(&robots, Colour::Yellow, Direction::Left), Position::new(0, 2));
    }

    #[test]
    fn applying_the_shortest_solution_clears_the_board() {
        let mut board = two_move_board();
        board.apply_all(&[
            Move::new(Colour::Red, Direction::Right),
            Move::new(Colour::Red, Direction::Down),
        ]);
        assert!(board.is_cleared());

        let mut blocked = two_move_board();
        blocked.apply(Move::new(Colour::Red, Direction::Down));
        assert!(!blocked.is_cleared());
    }

    #[test]
    fn walls_block_both_cells_and_ignore_the_border() {
        let goal = Goal { robot: Colour::Red, position: Position::new(1, 1) };
        let robots =
            [Position::new(0, 0), Position::new(1, 0), Position::new(0, 1), Position::new(1, 1)];
        let mut board = Board::new(2, 2, robots, goal);
        board.add_wall(Wall { position: Position::new(0, 1), side: WallSide::Above });
        board.add_wall(Wall { position: Position::new(0, 0), side: WallSide::Left });

        assert!(board.is_blocked(Position::new(0, 0), Direction::Down));
        assert!(board.is_blocked(Position::new(0, 1), Direction::Up));
        assert!(!board.is_blocked(Position::new(0, 0), Direction::Right));
        assert_eq!(board.open_sides(Position::new(0, 0)), 1);
        assert!(board.is_connected());

        board.add_wall(Wall { position: Position::new(1, 0), side: WallSide::Left });
        assert!(!board.is_connected());
    }

    #[test]
    fn moves_are_described_in_kanji() {
        let moves =
            [Move::new(Colour::Blue, Direction::Left), Move::new(Colour::Yellow, Direction::Up)];
        assert_eq!(describe_moves(&moves), "青左,黄上");
    }

    #[test]
    fn rendering_marks_robots_goal_and_walls() {
        let rendered = two_move_board().render();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "+---+---+---+---+---+");
        assert_eq!(lines[1], "|R              |   |");
        assert_eq!(lines[2], "+   +   +   +   +   +");
        assert_eq!(lines[3], "|G       B          |");
        assert_eq!(lines[5], "|             *  Y  |");
    }
}
