use crate::domain::item::{ItemId, StatusId, WorkItem};
use crate::error::{BoardError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

/// Orders issues inside one column: position ascending, unset positions last, then id
///
/// # Examples
/// ```
/// use agile_board_core::domain::item::{ItemId, ProjectId, StatusId, TrackerId, UserId, WorkItem};
/// use agile_board_core::domain::sorting::sort_by_position;
///
/// let card = |id: u64, position: Option<u32>| {
///     let mut item = WorkItem::new(
///         ItemId::new(id),
///         format!("Card {}", id),
///         ProjectId::new(1),
///         TrackerId::new(1),
///         StatusId::new(1),
///         UserId::new(1),
///     );
///     item.position = position;
///     item
/// };
///
/// let mut items = vec![card(3, None), card(2, Some(1)), card(1, None)];
/// sort_by_position(&mut items);
/// let ids: Vec<u64> = items.iter().map(|i| i.id.get()).collect();
/// assert_eq!(ids, vec![2, 1, 3]);
/// ```
pub fn sort_by_position(items: &mut [WorkItem]) {
    items.sort_by(|a, b| compare_positions(a.position, b.position).then(a.id.cmp(&b.id)));
}

/// Compare optional positions with None always sorting to end
fn compare_positions(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a_pos), Some(b_pos)) => a_pos.cmp(&b_pos),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Dense 1-based ranks of the issues in one column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PositionIndex {
    order: Vec<ItemId>,
    ranks: HashMap<ItemId, u32>,
}

impl PositionIndex {
    /// Builds the index from issues already sorted with [`sort_by_position`]
    pub fn from_sorted(items: &[WorkItem]) -> Self {
        let order: Vec<ItemId> = items.iter().map(|i| i.id).collect();
        let ranks = order
            .iter()
            .enumerate()
            .map(|(index, id)| (*id, index as u32 + 1))
            .collect();
        Self { order, ranks }
    }

    pub fn rank(&self, id: ItemId) -> Option<u32> {
        self.ranks.get(&id).copied()
    }

    pub fn order(&self) -> &[ItemId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Desired order of the cards in each affected column, keyed by status
///
/// Carries sequences rather than raw position numbers, so renumbering can
/// never leave gaps. Serialized as `{"<status id>": [<issue id>, ...]}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PositionMap {
    columns: BTreeMap<StatusId, Vec<ItemId>>,
}

impl PositionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the full order of one column, replacing any earlier order for it
    pub fn with_column(mut self, status_id: StatusId, order: Vec<ItemId>) -> Self {
        self.columns.insert(status_id, order);
        self
    }

    pub fn column(&self, status_id: StatusId) -> Option<&[ItemId]> {
        self.columns.get(&status_id).map(Vec::as_slice)
    }

    pub fn statuses(&self) -> impl Iterator<Item = StatusId> + '_ {
        self.columns.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Rejects an issue listed twice, within one column or across columns
    pub fn validate(&self, moved: ItemId) -> Result<()> {
        let mut seen = HashSet::new();
        for (status_id, order) in &self.columns {
            for id in order {
                if !seen.insert(*id) {
                    return Err(BoardError::invalid_transition(
                        moved,
                        format!("issue #{} listed twice in positions (status {})", id, status_id),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Absolute positions to write: each listed column renumbered 1..N in the given order
    pub fn assignments(&self) -> Vec<(ItemId, u32)> {
        self.columns
            .values()
            .flat_map(|order| {
                order
                    .iter()
                    .enumerate()
                    .map(|(index, id)| (*id, index as u32 + 1))
            })
            .collect()
    }
}
