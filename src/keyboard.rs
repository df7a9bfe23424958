use crossterm::event::KeyCode;

use crate::layout::{ItemPosition, WaterfallLayout};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    First,
    Last,
}

impl Direction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Up | KeyCode::Char('k') => Some(Direction::Up),
            KeyCode::Down | KeyCode::Char('j') => Some(Direction::Down),
            KeyCode::Left | KeyCode::Char('h') => Some(Direction::Left),
            KeyCode::Right | KeyCode::Char('l') => Some(Direction::Right),
            KeyCode::PageUp => Some(Direction::PageUp),
            KeyCode::PageDown => Some(Direction::PageDown),
            KeyCode::Home => Some(Direction::First),
            KeyCode::End => Some(Direction::Last),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NavState {
    #[default]
    Idle,
    Focused(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Moved(usize),
    Select(usize),
    Ignored,
}

/// Roving focus over the waterfall grid: exactly one item is tabbable, and
/// directional keys move by geometry rather than by index stride.
#[derive(Debug, Clone, Default)]
pub struct KeyboardNav {
    state: NavState,
}

impl KeyboardNav {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> NavState {
        self.state
    }

    pub fn focused(&self) -> Option<usize> {
        match self.state {
            NavState::Idle => None,
            NavState::Focused(index) => Some(index),
        }
    }

    /// The single item reachable with Tab: the last keyboard-focused item,
    /// or the first item before any focus happened.
    pub fn tabbable_index(&self, count: usize) -> Option<usize> {
        if count == 0 {
            return None;
        }
        Some(self.focused().filter(|index| *index < count).unwrap_or(0))
    }

    pub fn is_tabbable(&self, index: usize, count: usize) -> bool {
        self.tabbable_index(count) == Some(index)
    }

    pub fn focus(&mut self, index: usize) {
        self.state = NavState::Focused(index);
    }

    /// Forgets focus, e.g. when the result set is replaced.
    pub fn reset(&mut self) {
        self.state = NavState::Idle;
    }

    /// Keeps the focused index inside a list that shrank.
    pub fn clamp(&mut self, count: usize) {
        if let NavState::Focused(index) = self.state {
            self.state = if count == 0 {
                NavState::Idle
            } else {
                NavState::Focused(index.min(count - 1))
            };
        }
    }

    pub fn move_focus(&mut self, direction: Direction, layout: &WaterfallLayout) -> Option<usize> {
        let count = layout.len();
        let current = match self.state {
            NavState::Idle => {
                let index = self.tabbable_index(count)?;
                self.focus(index);
                return Some(index);
            }
            NavState::Focused(index) => index,
        };
        let target = target_index(current, direction, layout)?;
        self.focus(target);
        Some(target)
    }

    pub fn handle_key(&mut self, code: KeyCode, layout: &WaterfallLayout) -> KeyOutcome {
        let count = layout.len();
        match code {
            KeyCode::Enter => match self.focused().filter(|index| *index < count) {
                Some(index) => KeyOutcome::Select(index),
                None => KeyOutcome::Ignored,
            },
            KeyCode::Tab => match self.tabbable_index(count) {
                Some(index) => {
                    self.focus(index);
                    KeyOutcome::Moved(index)
                }
                None => KeyOutcome::Ignored,
            },
            other => match Direction::from_key(other)
                .and_then(|direction| self.move_focus(direction, layout))
            {
                Some(index) => KeyOutcome::Moved(index),
                None => KeyOutcome::Ignored,
            },
        }
    }
}

/// Item reached from `current` when moving in `direction`, if any.
pub fn target_index(current: usize, direction: Direction, layout: &WaterfallLayout) -> Option<usize> {
    let count = layout.len();
    if count == 0 {
        return None;
    }
    if direction == Direction::First {
        return (current != 0).then_some(0);
    }
    if direction == Direction::Last {
        return (current != count - 1).then_some(count - 1);
    }

    let here = *layout.position(current)?;
    match direction {
        Direction::Down => layout
            .lane_positions(here.lane)
            .find(|pos| pos.offset > here.offset)
            .map(|pos| pos.index),
        Direction::Up => layout
            .lane_positions(here.lane)
            .filter(|pos| pos.offset < here.offset)
            .last()
            .map(|pos| pos.index),
        Direction::Left => {
            let lane = here.lane.checked_sub(1)?;
            nearest_in_lane(layout, lane, here.center())
        }
        Direction::Right => {
            let lane = here.lane + 1;
            if lane >= layout.config().lanes {
                return None;
            }
            nearest_in_lane(layout, lane, here.center())
        }
        Direction::PageDown => {
            let target = here.center() + layout.viewport().max(here.size);
            closest(
                layout
                    .lane_positions(here.lane)
                    .filter(|pos| pos.offset > here.offset),
                target,
            )
        }
        Direction::PageUp => {
            let target = here.center() - layout.viewport().max(here.size);
            closest(
                layout
                    .lane_positions(here.lane)
                    .filter(|pos| pos.offset < here.offset),
                target,
            )
        }
        Direction::First | Direction::Last => None,
    }
}

/// Item in `lane` spanning vertical position `y`, else the one whose centre is
/// nearest to it.
fn nearest_in_lane(layout: &WaterfallLayout, lane: usize, y: f32) -> Option<usize> {
    if let Some(pos) = layout
        .lane_positions(lane)
        .find(|pos| pos.offset <= y && y < pos.end())
    {
        return Some(pos.index);
    }
    closest(layout.lane_positions(lane), y)
}

fn closest<'a>(candidates: impl Iterator<Item = &'a ItemPosition>, y: f32) -> Option<usize> {
    candidates
        .min_by(|a, b| {
            (a.center() - y)
                .abs()
                .total_cmp(&(b.center() - y).abs())
        })
        .map(|pos| pos.index)
}
