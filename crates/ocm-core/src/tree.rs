use crate::format::SubagentStats;
use crate::model::{agent_id_for_key, AgentGroup, SessionRecord, SubagentNode, MAIN_AGENT};
use std::collections::HashMap;

/// Group a flat session list by owning agent.
///
/// `main` sorts first, remaining groups ascend by agent id, and sessions keep
/// the order the gateway returned them in.
pub fn build_tree(records: &[SessionRecord]) -> Vec<AgentGroup> {
    let mut groups: Vec<AgentGroup> = Vec::new();
    let mut slots: HashMap<&str, usize> = HashMap::new();

    for record in records {
        let agent_id = record.agent_id();
        let slot = match slots.get(agent_id) {
            Some(slot) => *slot,
            None => {
                groups.push(AgentGroup::new(agent_id));
                slots.insert(agent_id, groups.len() - 1);
                groups.len() - 1
            }
        };
        groups[slot].sessions.push(record.clone());
    }

    groups.sort_by(|a, b| group_sort_key(&a.agent_id).cmp(&group_sort_key(&b.agent_id)));
    groups
}

fn group_sort_key(agent_id: &str) -> (u8, &str) {
    if agent_id == MAIN_AGENT {
        (0, "")
    } else {
        (1, agent_id)
    }
}

/// One complete poll result. Each snapshot supersedes the previous one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub groups: Vec<AgentGroup>,
    pub session_count: usize,
    /// Wall-clock ms of the cycle that produced this snapshot; `None` before
    /// the first successful poll.
    pub updated_at_ms: Option<i64>,
    /// Sub-agent tree counts; `None` when the gateway had no tree to give.
    pub subagents: Option<SubagentStats>,
}

impl Snapshot {
    pub fn from_records(records: &[SessionRecord], updated_at_ms: i64) -> Self {
        Self {
            groups: build_tree(records),
            session_count: records.len(),
            updated_at_ms: Some(updated_at_ms),
            subagents: None,
        }
    }

    pub fn with_subagents(mut self, nodes: &[SubagentNode]) -> Self {
        self.subagents = SubagentStats::tally(nodes);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.session_count == 0
    }
}

/// Stable identity of a visible row across rebuilds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeId {
    Group(String),
    Session(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeRow {
    pub group: usize,
    pub session: Option<usize>,
}

impl TreeRow {
    pub fn is_group(&self) -> bool {
        self.session.is_none()
    }
}

/// Navigation state layered over the latest groups.
///
/// Groups are replaced wholesale on every poll; expansion and selection are
/// carried forward by agent id and session key, never by row position.
#[derive(Debug, Clone, Default)]
pub struct TreeView {
    groups: Vec<AgentGroup>,
    rows: Vec<TreeRow>,
    expanded: HashMap<String, bool>,
    selected: Option<usize>,
}

impl TreeView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, groups: Vec<AgentGroup>) {
        let selection = self.selected_id();
        let previous_index = self.selected;
        self.groups = groups;
        self.recalc_rows();
        self.restore_selection(selection, previous_index);
    }

    pub fn groups(&self) -> &[AgentGroup] {
        &self.groups
    }

    pub fn rows(&self) -> &[TreeRow] {
        &self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn selected_index(&self) -> Option<usize> {
        self.selected
    }

    pub fn is_expanded(&self, agent_id: &str) -> bool {
        self.expanded.get(agent_id).copied().unwrap_or(true)
    }

    pub fn row_group(&self, row: TreeRow) -> Option<&AgentGroup> {
        self.groups.get(row.group)
    }

    pub fn row_session(&self, row: TreeRow) -> Option<&SessionRecord> {
        let index = row.session?;
        self.groups.get(row.group)?.sessions.get(index)
    }

    pub fn node_id(&self, row: TreeRow) -> Option<NodeId> {
        match row.session {
            Some(_) => self
                .row_session(row)
                .map(|session| NodeId::Session(session.key.clone())),
            None => self
                .row_group(row)
                .map(|group| NodeId::Group(group.agent_id.clone())),
        }
    }

    pub fn selected(&self) -> Option<TreeRow> {
        self.rows.get(self.selected?).copied()
    }

    pub fn selected_id(&self) -> Option<NodeId> {
        self.node_id(self.selected()?)
    }

    pub fn selected_session(&self) -> Option<&SessionRecord> {
        let row = *self.rows.get(self.selected?)?;
        self.row_session(row)
    }

    pub fn selected_group(&self) -> Option<&AgentGroup> {
        let row = *self.rows.get(self.selected?)?;
        self.row_group(row)
    }

    pub fn select(&mut self, id: &NodeId) -> bool {
        match self.position_of(id) {
            Some(index) => {
                self.selected = Some(index);
                true
            }
            None => false,
        }
    }

    pub fn select_first(&mut self) {
        self.selected = if self.rows.is_empty() { None } else { Some(0) };
    }

    pub fn move_selection(&mut self, delta: isize) {
        if self.rows.is_empty() {
            self.selected = None;
            return;
        }

        let current = self.selected.unwrap_or(0) as isize;
        let len = self.rows.len() as isize;
        let mut next = current + delta;
        if next < 0 {
            next = len - 1;
        }
        if next >= len {
            next = 0;
        }
        self.selected = Some(next as usize);
    }

    /// Flip expansion of the selected group row. Returns false when the
    /// selection is not a group.
    pub fn toggle_selected(&mut self) -> bool {
        let Some(NodeId::Group(agent_id)) = self.selected_id() else {
            return false;
        };
        let expanded = self.is_expanded(&agent_id);
        self.set_expanded(&agent_id, !expanded);
        true
    }

    pub fn set_expanded(&mut self, agent_id: &str, expanded: bool) {
        let selection = self.selected_id();
        let previous_index = self.selected;
        self.expanded.insert(agent_id.to_string(), expanded);
        self.recalc_rows();
        self.restore_selection(selection, previous_index);
    }

    pub fn expand_all(&mut self) {
        self.set_all(true);
    }

    pub fn collapse_all(&mut self) {
        self.set_all(false);
    }

    fn set_all(&mut self, expanded: bool) {
        let selection = self.selected_id();
        let previous_index = self.selected;
        for group in &self.groups {
            self.expanded.insert(group.agent_id.clone(), expanded);
        }
        self.recalc_rows();
        self.restore_selection(selection, previous_index);
    }

    fn recalc_rows(&mut self) {
        let mut rows = Vec::new();
        for (group_index, group) in self.groups.iter().enumerate() {
            rows.push(TreeRow {
                group: group_index,
                session: None,
            });
            if self.is_expanded(&group.agent_id) {
                for session_index in 0..group.sessions.len() {
                    rows.push(TreeRow {
                        group: group_index,
                        session: Some(session_index),
                    });
                }
            }
        }
        self.rows = rows;
    }

    fn position_of(&self, id: &NodeId) -> Option<usize> {
        self.rows
            .iter()
            .position(|row| self.node_id(*row).as_ref() == Some(id))
    }

    fn restore_selection(&mut self, selection: Option<NodeId>, previous_index: Option<usize>) {
        if let Some(id) = selection {
            if let Some(index) = self.position_of(&id) {
                self.selected = Some(index);
                return;
            }
            // A vanished or hidden session falls back to its agent's row.
            if let NodeId::Session(key) = &id {
                let parent = NodeId::Group(agent_id_for_key(key).to_string());
                if let Some(index) = self.position_of(&parent) {
                    self.selected = Some(index);
                    return;
                }
            }
        }

        if self.rows.is_empty() {
            self.selected = None;
            return;
        }
        self.selected = match previous_index {
            Some(index) if index < self.rows.len() => Some(index),
            Some(_) => Some(self.rows.len() - 1),
            None => Some(0),
        };
    }
}
