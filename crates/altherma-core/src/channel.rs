//! Channel model built by resource discovery
//!
//! Discovery builds a complete [`ChannelModel`] off to the side and commits
//! it into a [`SharedModel`] in one swap. Pollers take a snapshot (an `Arc`
//! clone) and never observe a partially built model.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::resource::{ChannelId, ResourcePath};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("Duplicate channel id: {0}")]
    DuplicateChannel(ChannelId),
    #[error("Duplicate group id: {0}")]
    DuplicateGroup(String),
}

/// One pollable leaf resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub path: ResourcePath,
    pub label: String,
}

impl Channel {
    pub fn new(path: ResourcePath) -> Self {
        Self {
            id: ChannelId::from_path(&path),
            label: path.label(),
            path,
        }
    }
}

/// A top-level numbered branch of the resource tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelGroup {
    /// Discovered label, or the numeric index when the device has none
    pub id: String,
    /// Numeric index the group answered at
    pub index: u32,
    pub label: String,
    pub description: String,
    pub channels: Vec<Channel>,
}

impl ChannelGroup {
    pub fn new(index: u32, name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            index,
            label: name.clone(),
            description: format!("All channels of the item:{}", name),
            id: name,
            channels: Vec::new(),
        }
    }

    pub fn root(&self) -> ResourcePath {
        ResourcePath::group(self.index)
    }
}

/// Immutable mapping from channel ids to resource paths and groups
#[derive(Debug, Clone, Default)]
pub struct ChannelModel {
    groups: Vec<ChannelGroup>,
    /// channel id -> (group position, channel position)
    index: HashMap<ChannelId, (usize, usize)>,
}

impl ChannelModel {
    /// Build a model, rejecting duplicate group or channel ids
    pub fn new(groups: Vec<ChannelGroup>) -> Result<Self, ModelError> {
        let mut index = HashMap::new();
        let mut group_ids = HashSet::new();
        for (g, group) in groups.iter().enumerate() {
            if !group_ids.insert(group.id.as_str()) {
                return Err(ModelError::DuplicateGroup(group.id.clone()));
            }
            for (c, channel) in group.channels.iter().enumerate() {
                if index.insert(channel.id.clone(), (g, c)).is_some() {
                    return Err(ModelError::DuplicateChannel(channel.id.clone()));
                }
            }
        }
        Ok(Self { groups, index })
    }

    pub fn groups(&self) -> &[ChannelGroup] {
        &self.groups
    }

    /// All channels in model order (group order, then discovery order)
    pub fn channels(&self) -> impl Iterator<Item = &Channel> {
        self.groups.iter().flat_map(|g| g.channels.iter())
    }

    pub fn channel(&self, id: &ChannelId) -> Option<&Channel> {
        let &(g, c) = self.index.get(id)?;
        self.groups.get(g)?.channels.get(c)
    }

    pub fn path_of(&self, id: &ChannelId) -> Option<&ResourcePath> {
        self.channel(id).map(|c| &c.path)
    }

    pub fn group_of(&self, id: &ChannelId) -> Option<&ChannelGroup> {
        let &(g, _) = self.index.get(id)?;
        self.groups.get(g)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

/// Single-writer, many-reader handle to the current model
#[derive(Debug, Clone, Default)]
pub struct SharedModel {
    current: Arc<RwLock<Arc<ChannelModel>>>,
}

impl SharedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot; stays valid even if a new model is committed
    pub fn snapshot(&self) -> Arc<ChannelModel> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the model in one step
    pub fn commit(&self, model: ChannelModel) {
        let model = Arc::new(model);
        match self.current.write() {
            Ok(mut guard) => *guard = model,
            Err(poisoned) => *poisoned.into_inner() = model,
        }
    }
}
