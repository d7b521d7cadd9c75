//! Location directory boundary and the tagged location tree adapter.
//!
//! Facilities are organised as a tree (hospital → building → ward). Some locations carry
//! tags: the nearest ancestor tagged as a medical record location owns the charts for
//! everything below it, and somewhere under that sits the archives room.

use crate::model::LocationId;
use crate::{PaperRecordError, PaperRecordResult};
use paper_record_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub trait LocationDirectory: Send + Sync {
    /// `location` itself if it carries `tag`, otherwise its nearest tagged ancestor.
    ///
    /// # Errors
    ///
    /// [`PaperRecordError::NoMatchingLocation`] if no location on the path to the root is
    /// tagged, [`PaperRecordError::UnknownLocation`] if `location` is not in the directory.
    fn nearest_tagged_ancestor(
        &self,
        location: &LocationId,
        tag: &NonEmptyText,
    ) -> PaperRecordResult<LocationId>;

    /// `location` itself if it carries `tag`, otherwise the first tagged descendant in
    /// depth-first order.
    fn first_tagged_descendant(
        &self,
        location: &LocationId,
        tag: &NonEmptyText,
    ) -> PaperRecordResult<LocationId>;
}

/// One row of the tree, as stored in snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationEntry {
    pub id: LocationId,
    pub parent: Option<LocationId>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

#[derive(Default)]
struct Tree {
    // Insertion order is kept so snapshots and descendant search are stable.
    order: Vec<LocationId>,
    nodes: BTreeMap<LocationId, Node>,
}

struct Node {
    parent: Option<LocationId>,
    tags: BTreeSet<String>,
    children: Vec<LocationId>,
}

/// In-memory location hierarchy.
#[derive(Default)]
pub struct LocationTree {
    tree: RwLock<Tree>,
}

impl LocationTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a location under `parent` (or as a root).
    ///
    /// # Errors
    ///
    /// [`PaperRecordError::InvalidInput`] if the location exists already,
    /// [`PaperRecordError::UnknownLocation`] if the parent does not.
    pub fn add_location(
        &self,
        id: LocationId,
        parent: Option<LocationId>,
        tags: impl IntoIterator<Item = String>,
    ) -> PaperRecordResult<()> {
        let mut tree = self.write()?;
        if tree.nodes.contains_key(&id) {
            return Err(PaperRecordError::InvalidInput(format!(
                "location {id} already exists"
            )));
        }
        if let Some(parent) = &parent {
            let Some(parent_node) = tree.nodes.get_mut(parent) else {
                return Err(PaperRecordError::UnknownLocation(parent.clone()));
            };
            parent_node.children.push(id.clone());
        }

        tree.order.push(id.clone());
        tree.nodes.insert(
            id,
            Node {
                parent,
                tags: tags.into_iter().collect(),
                children: Vec::new(),
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: &LocationId) -> PaperRecordResult<bool> {
        Ok(self.read()?.nodes.contains_key(id))
    }

    /// Rebuilds a tree. Entries must list parents before their children.
    pub fn from_entries(entries: Vec<LocationEntry>) -> PaperRecordResult<Self> {
        let tree = Self::new();
        for entry in entries {
            tree.add_location(entry.id, entry.parent, entry.tags)?;
        }
        Ok(tree)
    }

    pub fn entries(&self) -> PaperRecordResult<Vec<LocationEntry>> {
        let tree = self.read()?;
        Ok(tree
            .order
            .iter()
            .filter_map(|id| {
                tree.nodes.get(id).map(|node| LocationEntry {
                    id: id.clone(),
                    parent: node.parent.clone(),
                    tags: node.tags.clone(),
                })
            })
            .collect())
    }

    fn read(&self) -> PaperRecordResult<RwLockReadGuard<'_, Tree>> {
        self.tree
            .read()
            .map_err(|_| PaperRecordError::Storage("location tree lock poisoned".into()))
    }

    fn write(&self) -> PaperRecordResult<RwLockWriteGuard<'_, Tree>> {
        self.tree
            .write()
            .map_err(|_| PaperRecordError::Storage("location tree lock poisoned".into()))
    }
}

impl LocationDirectory for LocationTree {
    fn nearest_tagged_ancestor(
        &self,
        location: &LocationId,
        tag: &NonEmptyText,
    ) -> PaperRecordResult<LocationId> {
        let tree = self.read()?;
        if !tree.nodes.contains_key(location) {
            return Err(PaperRecordError::UnknownLocation(location.clone()));
        }

        let mut visited = HashSet::new();
        let mut current = Some(location);
        while let Some(id) = current {
            if !visited.insert(id) {
                break;
            }
            let Some(node) = tree.nodes.get(id) else {
                break;
            };
            if node.tags.contains(tag.as_str()) {
                return Ok(id.clone());
            }
            current = node.parent.as_ref();
        }

        Err(PaperRecordError::NoMatchingLocation {
            tag: tag.to_string(),
            location: location.clone(),
        })
    }

    fn first_tagged_descendant(
        &self,
        location: &LocationId,
        tag: &NonEmptyText,
    ) -> PaperRecordResult<LocationId> {
        let tree = self.read()?;
        if !tree.nodes.contains_key(location) {
            return Err(PaperRecordError::UnknownLocation(location.clone()));
        }

        let mut visited = HashSet::new();
        let mut stack = vec![location];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            let Some(node) = tree.nodes.get(id) else {
                continue;
            };
            if node.tags.contains(tag.as_str()) {
                return Ok(id.clone());
            }
            stack.extend(node.children.iter().rev());
        }

        Err(PaperRecordError::NoMatchingLocation {
            tag: tag.to_string(),
            location: location.clone(),
        })
    }
}
