//! Random boards and breadth-first search over robot placements.
//!
//! A search state is the four robot positions packed into a `u64`, 16 bits per robot.
//! Boards are at most 255 cells on a side.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::ricochet::board::{
    Board, Colour, Direction, Goal, Move, Position, Robots, Wall, WallSide, ROBOT_COUNT,
};

/// Search states explored before settling for the deepest goal found so far.
pub const MAX_STATES: usize = 2_000_000;
const GENERATION_ATTEMPTS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoardSpec {
    pub width: usize,
    pub height: usize,
    pub walls: usize,
}

/// A board together with a shortest solution for its goal.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Puzzle {
    pub board: Board,
    pub solution: Vec<Move>,
}

type StateKey = u64;

fn pack(robots: &Robots) -> StateKey {
    robots.iter().enumerate().fold(0, |key, (index, position)| {
        key | (((position.y as u64) << 8) | position.x as u64) << (index * 16)
    })
}

fn unpack(key: StateKey) -> Robots {
    let mut robots = [Position::new(0, 0); ROBOT_COUNT];
    for (index, robot) in robots.iter_mut().enumerate() {
        let bits = key >> (index * 16);
        *robot = Position::new((bits & 0xff) as usize, ((bits >> 8) & 0xff) as usize);
    }
    robots
}

type Parents = HashMap<StateKey, Option<(StateKey, Move)>>;

/// Records every unseen successor of `state` and returns them.
fn expand(board: &Board, state: StateKey, parents: &mut Parents) -> Vec<StateKey> {
    let robots = unpack(state);
    let mut successors = Vec::new();
    for colour in Colour::ALL {
        for direction in Direction::ALL {
            let stop = board.slide(&robots, colour, direction);
            if stop == robots[colour.index()] {
                continue;
            }
            let mut moved = robots;
            moved[colour.index()] = stop;
            let key = pack(&moved);
            if let Entry::Vacant(entry) = parents.entry(key) {
                entry.insert(Some((state, Move::new(colour, direction))));
                successors.push(key);
            }
        }
    }
    successors
}

fn path_to(parents: &Parents, mut state: StateKey) -> Vec<Move> {
    let mut moves = Vec::new();
    while let Some(Some((previous, step))) = parents.get(&state) {
        moves.push(*step);
        state = *previous;
    }
    moves.reverse();
    moves
}

/// Picks the goal whose shortest solution is `target` moves long, or the deepest goal
/// reachable when no such goal exists or the state budget runs out.
pub fn deepest_goal(board: &Board, target: usize, max_states: usize) -> (Goal, Vec<Move>) {
    let start = pack(board.robots());
    let mut parents = Parents::new();
    parents.insert(start, None);

    let cells = board.width() * board.height() * ROBOT_COUNT;
    let mut found: HashSet<(Colour, Position)> = HashSet::new();
    let mut best = (Goal { robot: Colour::Red, position: board.robot(Colour::Red) }, start);
    let mut frontier = vec![start];
    let mut depth = 0;

    'search: while !frontier.is_empty() && depth <= target {
        let mut next = Vec::new();
        for &state in &frontier {
            let robots = unpack(state);
            for colour in Colour::ALL {
                let position = robots[colour.index()];
                if found.insert((colour, position)) {
                    best = (Goal { robot: colour, position }, state);
                    if depth >= target || found.len() >= cells {
                        break 'search;
                    }
                }
            }
            next.extend(expand(board, state, &mut parents));
            if parents.len() >= max_states {
                break 'search;
            }
        }
        frontier = next;
        depth += 1;
    }

    (best.0, path_to(&parents, best.1))
}

/// Shortest move sequence that brings the goal robot onto the goal.
pub fn shortest_solution(board: &Board, max_states: usize) -> Option<Vec<Move>> {
    let goal = board.goal();
    let start = pack(board.robots());
    let mut parents = Parents::new();
    parents.insert(start, None);

    let mut frontier = vec![start];
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for &state in &frontier {
            if unpack(state)[goal.robot.index()] == goal.position {
                return Some(path_to(&parents, state));
            }
            next.extend(expand(board, state, &mut parents));
            if parents.len() >= max_states {
                return None;
            }
        }
        frontier = next;
    }
    None
}

/// Walls are added one at a time and kept only while every cell stays reachable and has
/// at least two open sides.
fn random_walls<R: Rng + ?Sized>(board: &mut Board, count: usize, rng: &mut R) {
    let (width, height) = (board.width(), board.height());
    for _ in 0..count {
        let (cx, cy) = (rng.gen_range(0..width), rng.gen_range(0..height));
        let mut candidate = board.clone();
        let above = Position::new(cx, cy + rng.gen_range(0..2));
        candidate.add_wall(Wall { position: above, side: WallSide::Above });
        let left = Position::new(cx + rng.gen_range(0..2), cy);
        candidate.add_wall(Wall { position: left, side: WallSide::Left });

        let lively = (0..height)
            .flat_map(|y| (0..width).map(move |x| Position::new(x, y)))
            .all(|position| candidate.open_sides(position) >= 2);
        if lively && candidate.is_connected() {
            *board = candidate;
        }
    }
}

fn random_robots<R: Rng + ?Sized>(width: usize, height: usize, rng: &mut R) -> Robots {
    let mut cells: Vec<Position> =
        (0..height).flat_map(|y| (0..width).map(move |x| Position::new(x, y))).collect();
    cells.shuffle(rng);
    let mut robots = [Position::new(0, 0); ROBOT_COUNT];
    robots.copy_from_slice(&cells[..ROBOT_COUNT]);
    robots
}

/// Swaps robot colours so the goal colour does not depend on search order.
fn shuffle_colours<R: Rng + ?Sized>(
    board: &mut Board,
    goal: Goal,
    moves: &mut [Move],
    rng: &mut R,
) -> Goal {
    let mut colours = Colour::ALL;
    colours.shuffle(rng);
    let recolour = |colour: Colour| colours[colour.index()];

    let mut robots = *board.robots();
    for colour in Colour::ALL {
        robots[recolour(colour).index()] = board.robot(colour);
    }
    board.set_robots(robots);
    for step in moves.iter_mut() {
        step.robot = recolour(step.robot);
    }
    Goal { robot: recolour(goal.robot), position: goal.position }
}

/// A random puzzle of `spec` whose solution is at most `depth` moves, as close to it as
/// the board allows. `None` if no attempt produced a goal that needs a move.
pub fn generate<R: Rng + ?Sized>(spec: BoardSpec, depth: usize, rng: &mut R) -> Option<Puzzle> {
    if spec.width * spec.height < ROBOT_COUNT || spec.width > 255 || spec.height > 255 {
        return None;
    }
    for _ in 0..GENERATION_ATTEMPTS {
        let robots = random_robots(spec.width, spec.height, rng);
        let placeholder = Goal { robot: Colour::Red, position: robots[0] };
        let mut board = Board::new(spec.width, spec.height, robots, placeholder);
        random_walls(&mut board, spec.walls, rng);

        let (goal, mut solution) = deepest_goal(&board, depth, MAX_STATES);
        if solution.is_empty() {
            continue;
        }
        let goal = shuffle_colours(&mut board, goal, &mut solution, rng);
        board.set_goal(goal);
        return Some(Puzzle { board, solution });
    }
    None
}
