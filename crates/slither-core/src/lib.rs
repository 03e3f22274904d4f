//! Core types shared across the slitherbots workspace.
//!
//! One "pit" hosts up to K simultaneous snake simulations, one per grid cell,
//! each driven either by an attached [`Network`] or by external steering. The
//! stepper advances every live snake once per tick, resolves collisions and
//! food events, and accounts fitness for the neuroevolution trainer.

use rand::{Rng, RngCore, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::HashSet;
use std::fmt;
use std::time::Instant;
use thiserror::Error;

new_key_type! {
    /// Stable handle for snakes backed by a generational slot map.
    pub struct SnakeId;
}

/// Convenience alias for associating side data with snakes.
pub type SnakeMap<T> = SecondaryMap<SnakeId, T>;

/// Number of sensor inputs wired into each brain.
pub const INPUT_SIZE: usize = 8;
/// Number of control outputs produced by each brain.
pub const OUTPUT_SIZE: usize = 4;

/// Grid spacing on a single-cell board.
pub const BASE_QUANTUM: f32 = 30.0;
/// Head displacement per tick on a single-cell board (half a quantum).
pub const BASE_VELOCITY: f32 = 15.0;

// Coordinates are dyadic for the common cell counts, but 30/sqrt(K) is not
// always exactly representable, so coordinate identity is tolerance-based.
const ALIGN_EPSILON: f32 = 1e-3;

#[inline]
fn approx_eq(a: f32, b: f32) -> bool {
    (a - b).abs() < ALIGN_EPSILON
}

/// High level simulation clock (ticks processed since generation start).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Resets the tick counter back to zero.
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Identity of a trainer-owned genome, stable across a generation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenomeId(pub u64);

/// Errors raised when constructing or validating a simulation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("population must contain at least one genome")]
    EmptyPopulation,
}

/// Errors raised by food placement.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlacementError {
    #[error("no free grid coordinate remains in the cell")]
    CellFull,
}

/// Discrete heading of a snake.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// Unit offset of this heading scaled by `step`.
    #[must_use]
    pub fn offset(self, step: f32) -> (f32, f32) {
        match self {
            Self::Up => (0.0, -step),
            Self::Down => (0.0, step),
            Self::Left => (-step, 0.0),
            Self::Right => (step, 0.0),
        }
    }
}

/// Grid-aligned board coordinate.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    /// Construct a new point.
    #[must_use]
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Coordinate identity within the alignment tolerance.
    #[must_use]
    pub fn coincides(self, other: Self) -> bool {
        approx_eq(self.x, other.x) && approx_eq(self.y, other.y)
    }
}

/// Returns the smallest perfect square greater than or equal to `n`.
#[must_use]
pub fn next_square(n: usize) -> usize {
    let mut root = 1usize;
    while root * root < n {
        root += 1;
    }
    root * root
}

/// Movement granularity derived from the active cell count.
///
/// Both the grid spacing and the per-tick step shrink as `30/sqrt(K)` so the
/// on-screen speed looks the same no matter how many snakes share the board.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Scale {
    pub quantum: f32,
    pub velocity: f32,
}

impl Scale {
    /// Derive the scale for a board partitioned into `cells` sub-cells.
    ///
    /// `cells` must be a perfect square (the output of [`next_square`]).
    #[must_use]
    pub fn for_cells(cells: usize) -> Self {
        let ratio = (cells as f32).sqrt();
        Self {
            quantum: BASE_QUANTUM / ratio,
            velocity: BASE_VELOCITY / ratio,
        }
    }
}

/// Immutable bounding box confining one snake/food pair.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Cell {
    pub x_begin: f32,
    pub x_end: f32,
    pub y_begin: f32,
    pub y_end: f32,
}

impl Cell {
    /// Construct a cell from its corner coordinates.
    #[must_use]
    pub const fn new(x_begin: f32, x_end: f32, y_begin: f32, y_end: f32) -> Self {
        Self {
            x_begin,
            x_end,
            y_begin,
            y_end,
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.x_end - self.x_begin
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.y_end - self.y_begin
    }

    /// Midpoint of the cell; always grid-aligned for boards partitioned by
    /// [`partition_board`] because each half-cell spans ten quanta.
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            (self.x_begin + self.x_end) / 2.0,
            (self.y_begin + self.y_end) / 2.0,
        )
    }

    /// Whether a point lies inside the cell (begin-inclusive, end-exclusive).
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x_begin && p.x < self.x_end && p.y >= self.y_begin && p.y < self.y_end
    }
}

/// Partition a square board into the smallest perfect-square cell count that
/// fits `population` snakes, ordered row-major (left to right, top to bottom).
///
/// The union of the returned cells tiles the board exactly.
#[must_use]
pub fn partition_board(board_size: f32, population: usize) -> (Vec<Cell>, Scale) {
    let cells = next_square(population.max(1));
    let root = (cells as f32).sqrt().round() as usize;
    let span = board_size / root as f32;
    let mut boxes = Vec::with_capacity(cells);
    for row in 0..root {
        for col in 0..root {
            boxes.push(Cell::new(
                col as f32 * span,
                (col + 1) as f32 * span,
                row as f32 * span,
                (row + 1) as f32 * span,
            ));
        }
    }
    (boxes, Scale::for_cells(cells))
}

/// One simulated snake: an ordered body, a heading, and the cell it lives in.
///
/// Index 0 is the head. Segments trail the head by exactly one prior head
/// position per tick (shift-register update), so consecutive segments sit one
/// velocity step apart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snake {
    segments: Vec<Point>,
    heading: Direction,
    cell: Cell,
    scale: Scale,
}

impl Snake {
    /// Spawn a three-segment snake at the cell center, heading up, with the
    /// body extending downward one velocity step per segment.
    #[must_use]
    pub fn spawn(cell: Cell, scale: Scale) -> Self {
        let head = cell.center();
        let segments = vec![
            head,
            Point::new(head.x, head.y + scale.velocity),
            Point::new(head.x, head.y + scale.quantum),
        ];
        Self {
            segments,
            heading: Direction::Up,
            cell,
            scale,
        }
    }

    #[must_use]
    pub fn head(&self) -> Point {
        self.segments[0]
    }

    #[must_use]
    pub fn tail(&self) -> Point {
        self.segments[self.segments.len() - 1]
    }

    #[must_use]
    pub fn segments(&self) -> &[Point] {
        &self.segments
    }

    #[must_use]
    pub const fn heading(&self) -> Direction {
        self.heading
    }

    #[must_use]
    pub const fn cell(&self) -> &Cell {
        &self.cell
    }

    #[must_use]
    pub const fn scale(&self) -> Scale {
        self.scale
    }

    /// Whether the head sits exactly on the steering grid.
    ///
    /// Steering resolution is one quantum while movement resolution is half a
    /// quantum, so only every other tick can change heading.
    #[must_use]
    pub fn is_grid_aligned(&self) -> bool {
        let head = self.head();
        let rx = head.x.rem_euclid(self.scale.quantum);
        let ry = head.y.rem_euclid(self.scale.quantum);
        (rx < ALIGN_EPSILON || self.scale.quantum - rx < ALIGN_EPSILON)
            && (ry < ALIGN_EPSILON || self.scale.quantum - ry < ALIGN_EPSILON)
    }

    /// Request a heading change. Dropped silently unless the head is
    /// grid-aligned, which keeps every turn on the cell grid.
    pub fn turn(&mut self, direction: Direction) {
        if self.is_grid_aligned() {
            self.heading = direction;
        }
    }

    /// Advance one tick: shift every segment to its predecessor's position
    /// (tail to head), then step the head along the current heading.
    pub fn advance(&mut self) {
        for i in (1..self.segments.len()).rev() {
            self.segments[i] = self.segments[i - 1];
        }
        let (dx, dy) = self.heading.offset(self.scale.velocity);
        self.segments[0].x += dx;
        self.segments[0].y += dy;
    }

    /// Whether the head has left the cell.
    ///
    /// The far walls are checked asymmetrically: the snake collides the
    /// instant it sits one velocity step short of the boundary while still
    /// moving outward, i.e. the moment the next step would cross it.
    #[must_use]
    pub fn has_wall_collision(&self) -> bool {
        let head = self.head();
        head.y < self.cell.y_begin
            || (approx_eq(head.y, self.cell.y_end - self.scale.velocity)
                && self.heading == Direction::Down)
            || head.x < self.cell.x_begin
            || (approx_eq(head.x, self.cell.x_end - self.scale.velocity)
                && self.heading == Direction::Right)
    }

    /// Whether any two segments (head included) occupy the same coordinate.
    #[must_use]
    pub fn has_self_collision(&self) -> bool {
        for i in 0..self.segments.len() {
            for j in (i + 1)..self.segments.len() {
                if self.segments[i].coincides(self.segments[j]) {
                    return true;
                }
            }
        }
        false
    }

    /// Append one tail segment; used by the delayed-growth mechanism with the
    /// coordinate the tail occupied when the food was eaten.
    pub fn append_segment(&mut self, coordinate: Point) {
        self.segments.push(coordinate);
    }

    /// Distance from the head to the nearest obstacle in each cardinal
    /// direction, ordered (right, left, down, up).
    ///
    /// A body segment on the head's row or column wins over the wall; segments
    /// are scanned head-outward and only the first hit per direction is kept,
    /// which yields the nearest one because the body is ordered by recency.
    #[must_use]
    pub fn obstacle_distances(&self) -> [f32; 4] {
        let head = self.head();
        let mut right = None;
        let mut left = None;
        let mut down = None;
        let mut up = None;

        for segment in &self.segments[1..] {
            if approx_eq(segment.y, head.y) {
                if segment.x < head.x && left.is_none() {
                    left = Some(head.x - segment.x);
                }
                if segment.x > head.x && right.is_none() {
                    right = Some(segment.x - head.x);
                }
            }
            if approx_eq(segment.x, head.x) {
                if segment.y < head.y && up.is_none() {
                    up = Some(head.y - segment.y);
                }
                if segment.y > head.y && down.is_none() {
                    down = Some(segment.y - head.y);
                }
            }
        }

        [
            right.unwrap_or(self.cell.x_end - head.x),
            left.unwrap_or(head.x - self.cell.x_begin),
            down.unwrap_or(self.cell.y_end - head.y),
            up.unwrap_or(head.y - self.cell.y_begin),
        ]
    }
}

/// One food pellet confined to a snake's cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Food {
    position: Point,
    cell: Cell,
    scale: Scale,
}

impl Food {
    /// Place a pellet on a random free grid coordinate of the cell.
    pub fn spawn(
        cell: Cell,
        scale: Scale,
        avoiding: &Snake,
        rng: &mut dyn RngCore,
    ) -> Result<Self, PlacementError> {
        let mut food = Self {
            position: Point::default(),
            cell,
            scale,
        };
        food.relocate(avoiding, rng)?;
        Ok(food)
    }

    #[must_use]
    pub const fn position(&self) -> Point {
        self.position
    }

    fn grid_dims(&self) -> (usize, usize) {
        let cols = (self.cell.width() / self.scale.quantum).round() as usize;
        let rows = (self.cell.height() / self.scale.quantum).round() as usize;
        (cols.max(1), rows.max(1))
    }

    fn grid_point(&self, col: usize, row: usize) -> Point {
        Point::new(
            self.cell.x_begin + col as f32 * self.scale.quantum,
            self.cell.y_begin + row as f32 * self.scale.quantum,
        )
    }

    /// Move the pellet to a grid coordinate not covered by `avoiding`'s body.
    ///
    /// Rejection sampling is bounded; once the cap is hit the free grid
    /// coordinates are enumerated and sampled directly, so a crowded cell
    /// cannot hang the tick. A cell with no free coordinate left reports
    /// [`PlacementError::CellFull`].
    pub fn relocate(
        &mut self,
        avoiding: &Snake,
        rng: &mut dyn RngCore,
    ) -> Result<(), PlacementError> {
        const MAX_REJECTION_SAMPLES: usize = 128;

        let (cols, rows) = self.grid_dims();
        let occupied = |p: Point| avoiding.segments().iter().any(|s| s.coincides(p));

        for _ in 0..MAX_REJECTION_SAMPLES {
            let candidate =
                self.grid_point(rng.random_range(0..cols), rng.random_range(0..rows));
            if !occupied(candidate) {
                self.position = candidate;
                return Ok(());
            }
        }

        let free: Vec<Point> = (0..rows)
            .flat_map(|row| (0..cols).map(move |col| (col, row)))
            .map(|(col, row)| self.grid_point(col, row))
            .filter(|&p| !occupied(p))
            .collect();
        if free.is_empty() {
            return Err(PlacementError::CellFull);
        }
        self.position = free[rng.random_range(0..free.len())];
        Ok(())
    }

    /// Whether the pellet coincides with the snake's head.
    #[must_use]
    pub fn is_eaten_by(&self, snake: &Snake) -> bool {
        self.position.coincides(snake.head())
    }

    /// Signed offset from the snake's head to the pellet.
    #[must_use]
    pub fn offset_from(&self, snake: &Snake) -> (f32, f32) {
        let head = snake.head();
        (self.position.x - head.x, self.position.y - head.y)
    }
}

/// Encode a snake/food pair into the fixed sensor vector fed to a brain:
/// (head_x, head_y, food_dx, food_dy, dist_right, dist_left, dist_down,
/// dist_up). Raw board coordinates, deliberately unnormalized.
#[must_use]
pub fn encode_sensors(snake: &Snake, food: &Food) -> [f32; INPUT_SIZE] {
    let head = snake.head();
    let (food_dx, food_dy) = food.offset_from(snake);
    let [right, left, down, up] = snake.obstacle_distances();
    [head.x, head.y, food_dx, food_dy, right, left, down, up]
}

/// Decode a brain output vector into a turn command: argmax over the four
/// outputs, lowest index winning ties, mapped 0=Right 1=Left 2=Down 3=Up.
#[must_use]
pub fn decode_action(outputs: &[f32; OUTPUT_SIZE]) -> Direction {
    let mut best = 0;
    for (index, value) in outputs.iter().enumerate().skip(1) {
        if *value > outputs[best] {
            best = index;
        }
    }
    match best {
        0 => Direction::Right,
        1 => Direction::Left,
        2 => Direction::Down,
        _ => Direction::Up,
    }
}

/// Thin trait object used to drive brain evaluations without coupling the
/// simulation to any concrete brain crate.
pub trait Network: Send {
    /// Static identifier of the brain implementation.
    fn kind(&self) -> &'static str;

    /// Evaluate outputs for the provided sensors.
    fn activate(&mut self, inputs: &[f32; INPUT_SIZE]) -> [f32; OUTPUT_SIZE];
}

/// Runtime data associated with a snake beyond its body state.
pub struct SnakeRuntime {
    network: Option<Box<dyn Network>>,
    genome: Option<GenomeId>,
    fitness: f32,
    score: u32,
    last_meal: Instant,
    pending_growth: u8,
    saved_tail: Point,
    chosen: bool,
}

impl fmt::Debug for SnakeRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnakeRuntime")
            .field("genome", &self.genome)
            .field("fitness", &self.fitness)
            .field("score", &self.score)
            .field("pending_growth", &self.pending_growth)
            .field("chosen", &self.chosen)
            .finish()
    }
}

impl SnakeRuntime {
    fn new(network: Option<Box<dyn Network>>, genome: Option<GenomeId>, tail: Point) -> Self {
        Self {
            network,
            genome,
            fitness: 0.0,
            score: 0,
            last_meal: Instant::now(),
            pending_growth: 0,
            saved_tail: tail,
            chosen: false,
        }
    }

    #[must_use]
    pub const fn fitness(&self) -> f32 {
        self.fitness
    }

    #[must_use]
    pub const fn score(&self) -> u32 {
        self.score
    }

    #[must_use]
    pub const fn genome(&self) -> Option<GenomeId> {
        self.genome
    }

    #[must_use]
    pub const fn is_chosen(&self) -> bool {
        self.chosen
    }
}

/// Dense storage of index-aligned snake/food rows addressed by stable handles.
///
/// Rows are removed with swap-remove and the displaced handle's slot is fixed
/// up, so handles never dangle and iteration never skips a live row.
#[derive(Default)]
pub struct PitArena {
    slots: SlotMap<SnakeId, usize>,
    handles: Vec<SnakeId>,
    snakes: Vec<Snake>,
    foods: Vec<Food>,
}

impl fmt::Debug for PitArena {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitArena")
            .field("len", &self.handles.len())
            .finish()
    }
}

impl PitArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an arena with reserved capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: SlotMap::with_capacity_and_key(capacity),
            handles: Vec::with_capacity(capacity),
            snakes: Vec::with_capacity(capacity),
            foods: Vec::with_capacity(capacity),
        }
    }

    /// Number of live rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Returns true when no rows are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Returns true if `id` refers to a live row.
    #[must_use]
    pub fn contains(&self, id: SnakeId) -> bool {
        self.slots.contains_key(id)
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: SnakeId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Iterate over live handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = SnakeId> + '_ {
        self.handles.iter().copied()
    }

    /// Insert a snake/food pair, returning its handle.
    pub fn insert(&mut self, snake: Snake, food: Food) -> SnakeId {
        let index = self.handles.len();
        self.snakes.push(snake);
        self.foods.push(food);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove `id`, returning its row if it was present.
    pub fn remove(&mut self, id: SnakeId) -> Option<(Snake, Food)> {
        let index = self.slots.remove(id)?;
        let snake = self.snakes.swap_remove(index);
        let food = self.foods.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some((snake, food))
    }

    #[must_use]
    pub fn snake(&self, id: SnakeId) -> Option<&Snake> {
        self.index_of(id).map(|i| &self.snakes[i])
    }

    #[must_use]
    pub fn snake_mut(&mut self, id: SnakeId) -> Option<&mut Snake> {
        self.index_of(id).map(|i| &mut self.snakes[i])
    }

    #[must_use]
    pub fn food(&self, id: SnakeId) -> Option<&Food> {
        self.index_of(id).map(|i| &self.foods[i])
    }

    /// Relocate the food paired with `id` away from its snake's body.
    pub fn relocate_food(
        &mut self,
        id: SnakeId,
        rng: &mut dyn RngCore,
    ) -> Result<(), PlacementError> {
        let Some(index) = self.index_of(id) else {
            return Ok(());
        };
        let snake = &self.snakes[index];
        self.foods[index].relocate(snake, rng)
    }
}

/// Tunable constants of one simulation run.
///
/// The game variants differ only in these numbers; everything else is the
/// same generalized loop.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    /// Side length of the square play area in board units.
    pub board_size: f32,
    /// Fitness added to every live snake each tick.
    pub survival_reward: f32,
    /// Fitness added when a pellet is eaten (2 / 30 / 50 across variants).
    pub food_reward: f32,
    /// Fitness subtracted when a snake dies.
    pub death_penalty: f32,
    /// Wall-clock seconds without a meal before a snake is culled. Real time
    /// rather than simulated time; this is the anti-loop safeguard.
    pub starvation_timeout_secs: f32,
    /// Ticks between eating and the tail segment appearing.
    pub growth_delay_ticks: u8,
    /// Hard tick cap per generation; 0 disables the cap.
    pub tick_budget: u64,
    /// Optional RNG seed for reproducible runs.
    pub rng_seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            board_size: 600.0,
            survival_reward: 0.5,
            food_reward: 30.0,
            death_penalty: 2.0,
            starvation_timeout_secs: 10.0,
            growth_delay_ticks: 2,
            tick_budget: 0,
            rng_seed: None,
        }
    }
}

impl SimConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), SimError> {
        if !(self.board_size > 0.0) {
            return Err(SimError::InvalidConfig("board_size must be positive"));
        }
        if self.growth_delay_ticks == 0 {
            return Err(SimError::InvalidConfig(
                "growth_delay_ticks must be at least 1",
            ));
        }
        if !self.survival_reward.is_finite()
            || !self.food_reward.is_finite()
            || !self.death_penalty.is_finite()
        {
            return Err(SimError::InvalidConfig("reward constants must be finite"));
        }
        if !(self.starvation_timeout_secs >= 0.0) {
            return Err(SimError::InvalidConfig(
                "starvation_timeout_secs must be non-negative",
            ));
        }
        Ok(())
    }

    fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => SmallRng::seed_from_u64(rand::random()),
        }
    }
}

/// Events emitted after processing one simulation tick.
#[derive(Debug, Clone, Default)]
pub struct TickEvents {
    pub tick: Tick,
    /// Snakes removed this tick by collision or starvation.
    pub deaths: Vec<SnakeId>,
    /// Snakes that ate a pellet this tick.
    pub meals: Vec<SnakeId>,
    /// Snakes retired because their cell has no free food coordinate left.
    pub saturated: Vec<SnakeId>,
    /// True when no snake remains alive.
    pub all_dead: bool,
}

/// Summary of one finished generation handed back to the trainer.
#[derive(Debug, Clone)]
pub struct GenerationReport {
    /// Ticks processed before the generation ended.
    pub ticks: Tick,
    /// Final fitness per genome, in death order (survivors flushed last).
    pub results: Vec<(GenomeId, f32)>,
    /// Highest pellet count reached by any snake.
    pub best_score: u32,
    /// Highest final fitness.
    pub best_fitness: Option<f32>,
    /// Snakes that died (as opposed to being retired or surviving).
    pub deaths: usize,
}

/// Read-only view of one snake for rendering layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnakeSnapshot {
    pub id: SnakeId,
    pub segments: Vec<Point>,
    pub heading: Direction,
    pub cell: Cell,
    pub food: Point,
    pub score: u32,
    pub fitness: f32,
    pub chosen: bool,
}

/// Aggregate simulation state for one generation of snakes.
///
/// All board geometry, counters, and per-snake side tables hang off this
/// context object; there is no ambient global state.
pub struct PitState {
    config: SimConfig,
    scale: Scale,
    tick: Tick,
    rng: SmallRng,
    arena: PitArena,
    runtime: SnakeMap<SnakeRuntime>,
    pending_deaths: Vec<SnakeId>,
    results: Vec<(GenomeId, f32)>,
    best_score: u32,
    deaths_total: usize,
}

impl fmt::Debug for PitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PitState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("alive", &self.arena.len())
            .finish()
    }
}

impl PitState {
    /// Build a population pit: one cell, snake, and food pellet per genome.
    ///
    /// Cell count is the smallest perfect square that fits the population;
    /// snakes are assigned to cells row-major in genome order.
    pub fn new(
        config: SimConfig,
        genomes: Vec<(GenomeId, Box<dyn Network>)>,
    ) -> Result<Self, SimError> {
        if genomes.is_empty() {
            return Err(SimError::EmptyPopulation);
        }
        let drivers = genomes
            .into_iter()
            .map(|(id, net)| (Some(id), Some(net)))
            .collect();
        Self::build(config, drivers)
    }

    /// Build a single-cell pit with one externally steered snake (human play).
    pub fn solo(config: SimConfig) -> Result<Self, SimError> {
        Self::build(config, vec![(None, None)])
    }

    #[allow(clippy::type_complexity)]
    fn build(
        config: SimConfig,
        drivers: Vec<(Option<GenomeId>, Option<Box<dyn Network>>)>,
    ) -> Result<Self, SimError> {
        config.validate()?;
        let mut rng = config.seeded_rng();
        let (cells, scale) = partition_board(config.board_size, drivers.len());

        let mut arena = PitArena::with_capacity(drivers.len());
        let mut runtime = SnakeMap::new();
        for ((genome, network), cell) in drivers.into_iter().zip(cells) {
            let snake = Snake::spawn(cell, scale);
            // A fresh three-segment snake never fills its cell, so spawning
            // food cannot fail here.
            let food = Food::spawn(cell, scale, &snake, &mut rng)
                .map_err(|_| SimError::InvalidConfig("cell too small for food"))?;
            let tail = snake.tail();
            let id = arena.insert(snake, food);
            runtime.insert(id, SnakeRuntime::new(network, genome, tail));
        }

        Ok(Self {
            config,
            scale,
            tick: Tick::zero(),
            rng,
            arena,
            runtime,
            pending_deaths: Vec::new(),
            results: Vec::new(),
            best_score: 0,
            deaths_total: 0,
        })
    }

    /// Returns an immutable reference to configuration.
    #[must_use]
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Active movement scale.
    #[must_use]
    pub const fn scale(&self) -> Scale {
        self.scale
    }

    /// Current simulation tick.
    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Number of live snakes.
    #[must_use]
    pub fn alive_count(&self) -> usize {
        self.arena.len()
    }

    /// Read-only access to the arena.
    #[must_use]
    pub fn arena(&self) -> &PitArena {
        &self.arena
    }

    /// Borrow runtime data for a specific snake.
    #[must_use]
    pub fn snake_runtime(&self, id: SnakeId) -> Option<&SnakeRuntime> {
        self.runtime.get(id)
    }

    /// Externally steer a snake (human play); returns false for dead handles.
    pub fn steer(&mut self, id: SnakeId, direction: Direction) -> bool {
        match self.arena.snake_mut(id) {
            Some(snake) => {
                snake.turn(direction);
                true
            }
            None => false,
        }
    }

    /// Mark one snake as chosen for the enlarged inspect view, clearing any
    /// previous choice. Returns false for dead handles.
    pub fn choose(&mut self, id: SnakeId) -> bool {
        if !self.arena.contains(id) {
            return false;
        }
        for runtime in self.runtime.values_mut() {
            runtime.chosen = false;
        }
        if let Some(runtime) = self.runtime.get_mut(id) {
            runtime.chosen = true;
        }
        true
    }

    /// Clear the inspect-view choice (return to grid view).
    pub fn clear_chosen(&mut self) {
        for runtime in self.runtime.values_mut() {
            runtime.chosen = false;
        }
    }

    /// Currently chosen snake, if any and still alive.
    #[must_use]
    pub fn chosen(&self) -> Option<SnakeId> {
        self.arena
            .iter_handles()
            .find(|id| self.runtime.get(*id).is_some_and(|rt| rt.chosen))
    }

    /// Produce a read-only snapshot of one snake for rendering.
    #[must_use]
    pub fn snapshot(&self, id: SnakeId) -> Option<SnakeSnapshot> {
        let snake = self.arena.snake(id)?;
        let food = self.arena.food(id)?;
        let runtime = self.runtime.get(id)?;
        Some(SnakeSnapshot {
            id,
            segments: snake.segments().to_vec(),
            heading: snake.heading(),
            cell: *snake.cell(),
            food: food.position(),
            score: runtime.score,
            fitness: runtime.fitness,
            chosen: runtime.chosen,
        })
    }

    /// Snapshots of every live snake, in dense iteration order.
    #[must_use]
    pub fn snapshots(&self) -> Vec<SnakeSnapshot> {
        self.arena
            .iter_handles()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    /// Execute one simulation tick for every live snake.
    pub fn step(&mut self) -> TickEvents {
        let next_tick = self.tick.next();

        self.stage_drive();
        let deaths = self.stage_death_sweep();
        self.stage_growth();
        let (meals, saturated) = self.stage_food();

        self.tick = next_tick;
        TickEvents {
            tick: next_tick,
            deaths,
            meals,
            saturated,
            all_dead: self.arena.is_empty(),
        }
    }

    /// Whether the generation is over: everyone dead or tick budget spent.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.arena.is_empty()
            || (self.config.tick_budget > 0 && self.tick.0 >= self.config.tick_budget)
    }

    /// Consume the pit, flushing surviving snakes' fitness (no death penalty)
    /// and returning the generation report for the trainer.
    #[must_use]
    pub fn finish(mut self) -> GenerationReport {
        let survivors: Vec<SnakeId> = self.arena.iter_handles().collect();
        for id in survivors {
            if let Some(runtime) = self.runtime.remove(id)
                && let Some(genome) = runtime.genome
            {
                self.results.push((genome, runtime.fitness));
            }
            self.arena.remove(id);
        }
        let best_fitness = self
            .results
            .iter()
            .map(|(_, fitness)| *fitness)
            .fold(None, |acc: Option<f32>, f| {
                Some(acc.map_or(f, |best| best.max(f)))
            });
        GenerationReport {
            ticks: self.tick,
            results: self.results,
            best_score: self.best_score,
            best_fitness,
            deaths: self.deaths_total,
        }
    }

    /// Per-tick reward, sensing, brain evaluation, steering, and movement.
    fn stage_drive(&mut self) {
        let survival = self.config.survival_reward;
        let handles: Vec<SnakeId> = self.arena.iter_handles().collect();
        for id in handles {
            let Some(runtime) = self.runtime.get_mut(id) else {
                continue;
            };
            runtime.fitness += survival;

            let action = match runtime.network.as_mut() {
                Some(network) => {
                    let (Some(snake), Some(food)) = (self.arena.snake(id), self.arena.food(id))
                    else {
                        continue;
                    };
                    let sensors = encode_sensors(snake, food);
                    Some(decode_action(&network.activate(&sensors)))
                }
                None => None,
            };

            if let Some(snake) = self.arena.snake_mut(id) {
                if let Some(direction) = action {
                    snake.turn(direction);
                }
                snake.advance();
            }
        }
    }

    /// Collect and apply deaths after the movement sweep. Removal happens in
    /// a second phase so a removal can never shift a row out from under the
    /// iteration that detected it.
    fn stage_death_sweep(&mut self) -> Vec<SnakeId> {
        let timeout = self.config.starvation_timeout_secs;
        for id in self.arena.iter_handles() {
            let Some(snake) = self.arena.snake(id) else {
                continue;
            };
            let starved = self
                .runtime
                .get(id)
                .is_some_and(|rt| rt.last_meal.elapsed().as_secs_f32() >= timeout);
            if snake.has_wall_collision() || snake.has_self_collision() || starved {
                self.pending_deaths.push(id);
            }
        }
        self.apply_deaths()
    }

    fn apply_deaths(&mut self) -> Vec<SnakeId> {
        if self.pending_deaths.is_empty() {
            return Vec::new();
        }
        let penalty = self.config.death_penalty;
        let mut seen = HashSet::new();
        let mut removed = Vec::new();
        let drained: Vec<SnakeId> = self.pending_deaths.drain(..).collect();
        for id in drained {
            if !seen.insert(id) || !self.arena.contains(id) {
                continue;
            }
            if let Some(mut runtime) = self.runtime.remove(id) {
                runtime.fitness -= penalty;
                if let Some(genome) = runtime.genome {
                    self.results.push((genome, runtime.fitness));
                }
            }
            self.arena.remove(id);
            removed.push(id);
        }
        self.deaths_total += removed.len();
        removed
    }

    /// Advance delayed-growth counters and append pending tail segments.
    ///
    /// Eating sets the counter to 1; this stage bumps it once per tick and
    /// appends the saved tail coordinate when it reaches the configured
    /// delay. The one-tick latency keeps the new segment from aliasing the
    /// vacating tail on the eat tick.
    fn stage_growth(&mut self) {
        let delay = self.config.growth_delay_ticks;
        let handles: Vec<SnakeId> = self.arena.iter_handles().collect();
        for id in handles {
            let Some(runtime) = self.runtime.get_mut(id) else {
                continue;
            };
            if runtime.pending_growth == 0 {
                continue;
            }
            runtime.pending_growth += 1;
            if runtime.pending_growth >= delay {
                let tail = runtime.saved_tail;
                runtime.pending_growth = 0;
                if let Some(snake) = self.arena.snake_mut(id) {
                    snake.append_segment(tail);
                }
            }
        }
    }

    /// Resolve pellet consumption: reward, starvation-clock reset, growth
    /// scheduling, and relocation. A cell with no free coordinate retires its
    /// snake without the death penalty.
    fn stage_food(&mut self) -> (Vec<SnakeId>, Vec<SnakeId>) {
        let reward = self.config.food_reward;
        let mut meals = Vec::new();
        let mut saturated = Vec::new();

        let handles: Vec<SnakeId> = self.arena.iter_handles().collect();
        for id in handles {
            let eaten = match (self.arena.snake(id), self.arena.food(id)) {
                (Some(snake), Some(food)) => food.is_eaten_by(snake),
                _ => continue,
            };
            if !eaten {
                continue;
            }

            let tail = match self.arena.snake(id) {
                Some(snake) => snake.tail(),
                None => continue,
            };
            if let Some(runtime) = self.runtime.get_mut(id) {
                runtime.fitness += reward;
                runtime.score += 1;
                runtime.last_meal = Instant::now();
                runtime.pending_growth = 1;
                runtime.saved_tail = tail;
                self.best_score = self.best_score.max(runtime.score);
            }

            match self.arena.relocate_food(id, &mut self.rng) {
                Ok(()) => meals.push(id),
                Err(PlacementError::CellFull) => saturated.push(id),
            }
        }

        for &id in &saturated {
            if let Some(runtime) = self.runtime.remove(id)
                && let Some(genome) = runtime.genome
            {
                self.results.push((genome, runtime.fitness));
            }
            self.arena.remove(id);
        }

        (meals, saturated)
    }
}
