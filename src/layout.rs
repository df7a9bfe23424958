use serde::{Deserialize, Serialize};

use crate::model::{Item, MediaReference};

pub const DEFAULT_LANES: usize = 2;
pub const DEFAULT_ITEM_WIDTH: f32 = 160.0;
pub const DEFAULT_GAP: f32 = 4.0;
pub const DEFAULT_OVERSCAN_PER_LANE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayoutConfig {
    #[serde(default = "default_lanes")]
    pub lanes: usize,
    #[serde(default = "default_item_width")]
    pub item_width: f32,
    #[serde(default = "default_gap")]
    pub gap: f32,
    #[serde(default = "default_overscan_per_lane")]
    pub overscan_per_lane: usize,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            lanes: default_lanes(),
            item_width: default_item_width(),
            gap: default_gap(),
            overscan_per_lane: default_overscan_per_lane(),
        }
    }
}

impl LayoutConfig {
    /// Items rendered beyond each viewport edge.
    pub fn overscan(&self) -> usize {
        self.overscan_per_lane * self.lanes.max(1)
    }
}

fn default_lanes() -> usize {
    DEFAULT_LANES
}

fn default_item_width() -> f32 {
    DEFAULT_ITEM_WIDTH
}

fn default_gap() -> f32 {
    DEFAULT_GAP
}

fn default_overscan_per_lane() -> usize {
    DEFAULT_OVERSCAN_PER_LANE
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ItemPosition {
    pub index: usize,
    pub lane: usize,
    pub offset: f32,
    pub size: f32,
}

impl ItemPosition {
    pub fn end(&self) -> f32 {
        self.offset + self.size
    }

    pub fn center(&self) -> f32 {
        self.offset + self.size / 2.0
    }
}

/// Indices to render. `start..=end` is the overscanned viewport window;
/// `indices` additionally always carries the first and last item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleRange {
    pub start: usize,
    pub end: usize,
    pub indices: Vec<usize>,
}

impl VisibleRange {
    pub fn contains(&self, index: usize) -> bool {
        self.indices.binary_search(&index).is_ok()
    }
}

/// Rendered height of an item of `item_width` showing `reference`.
pub fn estimate_item_size(reference: &MediaReference, item_width: f32) -> f32 {
    if reference.width == 0 || reference.height == 0 {
        return item_width;
    }
    item_width * reference.height as f32 / reference.width as f32
}

/// Masonry placement over a fixed number of lanes with windowed rendering.
///
/// Each item goes into the currently shortest lane (lowest lane wins ties),
/// so an item's position only depends on the items before it.
#[derive(Debug, Clone)]
pub struct WaterfallLayout {
    config: LayoutConfig,
    positions: Vec<ItemPosition>,
    lane_extents: Vec<f32>,
    scroll_offset: f32,
    viewport: f32,
    prefetched_at: Option<usize>,
}

impl Default for WaterfallLayout {
    fn default() -> Self {
        Self::new(LayoutConfig::default())
    }
}

impl WaterfallLayout {
    pub fn new(config: LayoutConfig) -> Self {
        let lanes = config.lanes.max(1);
        Self {
            config: LayoutConfig { lanes, ..config },
            positions: Vec::new(),
            lane_extents: vec![0.0; lanes],
            scroll_offset: 0.0,
            viewport: 0.0,
            prefetched_at: None,
        }
    }

    pub fn config(&self) -> &LayoutConfig {
        &self.config
    }

    pub fn set_items(&mut self, items: &[Item]) {
        let sizes: Vec<f32> = items
            .iter()
            .map(|item| estimate_item_size(&item.preview_media, self.config.item_width))
            .collect();
        self.set_sizes(&sizes);
    }

    pub fn set_sizes(&mut self, sizes: &[f32]) {
        self.positions.clear();
        self.lane_extents.iter_mut().for_each(|extent| *extent = 0.0);
        for (index, size) in sizes.iter().copied().enumerate() {
            let lane = shortest_lane(&self.lane_extents);
            let offset = self.lane_extents[lane];
            self.positions.push(ItemPosition {
                index,
                lane,
                offset,
                size,
            });
            self.lane_extents[lane] = offset + size + self.config.gap;
        }
        self.clamp_scroll();
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn positions(&self) -> &[ItemPosition] {
        &self.positions
    }

    pub fn position(&self, index: usize) -> Option<&ItemPosition> {
        self.positions.get(index)
    }

    /// Positions in `lane`, top to bottom.
    pub fn lane_positions(&self, lane: usize) -> impl Iterator<Item = &ItemPosition> {
        self.positions.iter().filter(move |pos| pos.lane == lane)
    }

    /// Total scrollable height.
    pub fn content_extent(&self) -> f32 {
        if self.positions.is_empty() {
            return 0.0;
        }
        let tallest = self.lane_extents.iter().copied().fold(0.0f32, f32::max);
        (tallest - self.config.gap).max(0.0)
    }

    pub fn scroll_offset(&self) -> f32 {
        self.scroll_offset
    }

    pub fn viewport(&self) -> f32 {
        self.viewport
    }

    pub fn set_viewport(&mut self, height: f32) {
        self.viewport = height.max(0.0);
        self.clamp_scroll();
    }

    pub fn scroll_to(&mut self, offset: f32) {
        self.scroll_offset = offset;
        self.clamp_scroll();
    }

    pub fn scroll_by(&mut self, delta: f32) {
        self.scroll_to(self.scroll_offset + delta);
    }

    /// Back to the top with a fresh prefetch trigger, for a new result set.
    pub fn reset(&mut self) {
        self.scroll_offset = 0.0;
        self.prefetched_at = None;
    }

    /// Allows [`should_prefetch`](Self::should_prefetch) to fire again at the
    /// current item count, e.g. after a reload or a page that added nothing.
    pub fn rearm_prefetch(&mut self) {
        self.prefetched_at = None;
    }

    /// Scrolls the minimum amount needed to show item `index` entirely.
    pub fn scroll_into_view(&mut self, index: usize) {
        let Some(pos) = self.positions.get(index).copied() else {
            return;
        };
        if pos.offset < self.scroll_offset {
            self.scroll_to(pos.offset);
        } else if pos.end() > self.scroll_offset + self.viewport {
            self.scroll_to(pos.end() - self.viewport);
        }
    }

    pub fn visible_range(&self) -> Option<VisibleRange> {
        let count = self.positions.len();
        if count == 0 {
            return None;
        }
        let last_index = count - 1;
        let window_start = self.scroll_offset;
        let window_end = self.scroll_offset + self.viewport;

        let mut first_visible = None;
        let mut last_visible = None;
        for pos in &self.positions {
            let intersects = if self.viewport > 0.0 {
                pos.end() > window_start && pos.offset < window_end
            } else {
                pos.end() >= window_start && pos.offset <= window_end
            };
            if intersects {
                first_visible.get_or_insert(pos.index);
                last_visible = Some(pos.index);
            }
        }
        let (first, last) = match (first_visible, last_visible) {
            (Some(first), Some(last)) => (first, last),
            _ => (last_index, last_index),
        };

        let overscan = self.config.overscan();
        let start = first.saturating_sub(overscan);
        let end = last.saturating_add(overscan).min(last_index);

        let mut indices = Vec::with_capacity(end - start + 3);
        if start > 0 {
            indices.push(0);
        }
        indices.extend(start..=end);
        if end < last_index {
            indices.push(last_index);
        }
        Some(VisibleRange {
            start,
            end,
            indices,
        })
    }

    /// True once per item count when the rendered window approaches the end
    /// of the list and another page can be requested.
    pub fn should_prefetch(&mut self, has_next_page: bool, loading: bool) -> bool {
        if !has_next_page || loading {
            return false;
        }
        let count = self.positions.len();
        if self.prefetched_at == Some(count) {
            return false;
        }
        let Some(range) = self.visible_range() else {
            return false;
        };
        if range.end + self.config.overscan() < count - 1 {
            return false;
        }
        self.prefetched_at = Some(count);
        true
    }

    fn clamp_scroll(&mut self) {
        let max = (self.content_extent() - self.viewport).max(0.0);
        self.scroll_offset = self.scroll_offset.clamp(0.0, max);
    }
}

fn shortest_lane(extents: &[f32]) -> usize {
    let mut best = 0;
    for (lane, extent) in extents.iter().enumerate() {
        if *extent < extents[best] {
            best = lane;
        }
    }
    best
}
