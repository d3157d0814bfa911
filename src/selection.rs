use crate::models::MediaItem;

/// Action the UI should take before presenting a selection surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreSelectionAction {
    None,
    /// Single-select mode with a stale selection: clear it so the next
    /// tap replaces rather than fails.
    DeselectAll,
}

/// Derived selection flags reported after every selection operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionState {
    pub is_any_item_selected: bool,
    pub can_select_more_items: bool,
    pub pre_selection_action: PreSelectionAction,
}

/// The one authoritative selection set. Camera captures and library picks
/// both count against the same cap, so the limit can never be
/// double-spent across the two paths.
///
/// Selection order is preserved and is the order returned to the host,
/// independent of how the album displays the items.
pub struct SelectionSetManager {
    max_selected_items: Option<usize>,
    selected: Vec<MediaItem>,
}

impl SelectionSetManager {
    /// `max_selected_items` of `None` means unbounded.
    pub fn new(max_selected_items: Option<usize>) -> Self {
        Self {
            max_selected_items,
            selected: Vec::new(),
        }
    }

    pub fn max_selected_items(&self) -> Option<usize> {
        self.max_selected_items
    }

    pub fn selected_items(&self) -> &[MediaItem] {
        &self.selected
    }

    pub fn selected_count(&self) -> usize {
        self.selected.len()
    }

    pub fn is_selected(&self, item: &MediaItem) -> bool {
        self.selected.contains(item)
    }

    pub fn can_select_more_items(&self) -> bool {
        match self.max_selected_items {
            Some(max) => self.selected.len() < max,
            None => true,
        }
    }

    /// Appends the item to the selection. No-op when already selected or
    /// the cap is reached; the cap is enforced here, never corrected
    /// after the fact.
    pub fn select_item(&mut self, item: &MediaItem) -> SelectionState {
        if !self.is_selected(item) {
            if self.can_select_more_items() {
                self.selected.push(item.clone());
            } else {
                log::debug!("Selection cap reached, ignoring select");
            }
        }
        self.state()
    }

    /// Removes the item if present; no-op otherwise.
    pub fn deselect_item(&mut self, item: &MediaItem) -> SelectionState {
        self.selected.retain(|selected| selected != item);
        self.state()
    }

    /// Recomputes derived flags without touching membership. Used when a
    /// selection surface appears, to seed its affordances.
    pub fn prepare_selection(&self) -> SelectionState {
        let mut state = self.state();
        if self.max_selected_items == Some(1) && !self.selected.is_empty() {
            state.pre_selection_action = PreSelectionAction::DeselectAll;
        }
        state
    }

    /// Replaces a selected item in place, keeping its selection-order
    /// position. No-op when the old item is not selected.
    pub fn replace_item(&mut self, old: &MediaItem, new: MediaItem) {
        if let Some(slot) = self.selected.iter_mut().find(|selected| *selected == old) {
            *slot = new;
        }
    }

    fn state(&self) -> SelectionState {
        SelectionState {
            is_any_item_selected: !self.selected.is_empty(),
            can_select_more_items: self.can_select_more_items(),
            pre_selection_action: PreSelectionAction::None,
        }
    }
}
