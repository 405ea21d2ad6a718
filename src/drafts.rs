//! Local optimistic drafts merged with server-confirmed drafts.

use std::collections::HashMap;

use log::debug;
use uuid::Uuid;

use crate::models::DraftPin;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftOrigin {
    Local,
    Server,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergedDraft {
    pub pin: DraftPin,
    pub origin: DraftOrigin,
}

/// Union of both tiers keyed by id. A server entry always replaces the local
/// one in place; order is first appearance, local tier first.
pub fn merge_drafts(local: &[DraftPin], server: &[DraftPin]) -> Vec<MergedDraft> {
    let mut merged: Vec<MergedDraft> = Vec::with_capacity(local.len() + server.len());
    let mut index: HashMap<&str, usize> = HashMap::new();

    let tiers = local
        .iter()
        .map(|p| (p, DraftOrigin::Local))
        .chain(server.iter().map(|p| (p, DraftOrigin::Server)));
    for (pin, origin) in tiers {
        let entry = MergedDraft {
            pin: pin.clone(),
            origin,
        };
        match index.get(pin.id.as_str()) {
            Some(&at) => merged[at] = entry,
            None => {
                index.insert(pin.id.as_str(), merged.len());
                merged.push(entry);
            }
        }
    }
    merged
}

#[derive(Debug, Default, Clone)]
pub struct DraftStore {
    local: Vec<DraftPin>,
    server: Vec<DraftPin>,
}

impl DraftStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_temp_id() -> String {
        format!("tmp-{}", Uuid::new_v4())
    }

    /// Server drafts are replaced wholesale on every fetch.
    pub fn set_server_drafts(&mut self, drafts: Vec<DraftPin>) {
        self.server = drafts;
    }

    pub fn upsert_draft_marker(&mut self, draft: DraftPin) {
        match self.local.iter_mut().find(|d| d.id == draft.id) {
            Some(existing) => *existing = draft,
            None => self.local.push(draft),
        }
    }

    /// Renames a local draft once the server has assigned its real id.
    pub fn replace_temp_by_real_id(&mut self, temp_id: &str, real_id: &str) -> bool {
        let Some(pos) = self.local.iter().position(|d| d.id == temp_id) else {
            return false;
        };
        debug!("🔁 draft {} confirmed as {}", temp_id, real_id);
        let mut draft = self.local.remove(pos);
        draft.id = real_id.to_string();
        self.local.retain(|d| d.id != real_id);
        self.local.insert(pos.min(self.local.len()), draft);
        true
    }

    pub fn remove_local(&mut self, id: &str) -> bool {
        let before = self.local.len();
        self.local.retain(|d| d.id != id);
        before != self.local.len()
    }

    pub fn clear_local_drafts(&mut self) {
        self.local.clear();
    }

    pub fn local(&self) -> &[DraftPin] {
        &self.local
    }

    pub fn server(&self) -> &[DraftPin] {
        &self.server
    }

    pub fn merged(&self) -> Vec<MergedDraft> {
        merge_drafts(&self.local, &self.server)
    }
}
