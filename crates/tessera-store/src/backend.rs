//! Backend selection by name.

use std::fmt;
use std::str::FromStr;

use crate::config::StoreConfig;
use crate::dtree::DTreeStore;
use crate::hashcons::HashConsStore;
use crate::map::MapStore;
use crate::storage::{StateStorage, StoreError, StoreResult};
use crate::tree::TreeStore;

/// Storage backend choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BackendKind {
    /// Sharded map, one entry per vector.
    StdMap,
    /// Lock-free hash-consing of whole vectors.
    #[default]
    Cchm,
    /// Chunk tree over two `stdmap` stores.
    TreeStdMap,
    /// Chunk tree over two `cchm` stores.
    TreeCchm,
    /// Chunk tree over one shared `cchm` store.
    TreeMod,
    /// Binary tree of per-level intern tables.
    DTree,
}

impl BackendKind {
    pub const ALL: [BackendKind; 6] = [
        BackendKind::StdMap,
        BackendKind::Cchm,
        BackendKind::TreeStdMap,
        BackendKind::TreeCchm,
        BackendKind::TreeMod,
        BackendKind::DTree,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::StdMap => "stdmap",
            BackendKind::Cchm => "cchm",
            BackendKind::TreeStdMap => "treedbs_stdmap",
            BackendKind::TreeCchm => "treedbs_cchm",
            BackendKind::TreeMod => "treedbsmod",
            BackendKind::DTree => "dtree",
        }
    }

    /// Whether the backend shares structure between similar states.
    pub fn is_tree(self) -> bool {
        matches!(
            self,
            BackendKind::TreeStdMap | BackendKind::TreeCchm | BackendKind::TreeMod | BackendKind::DTree
        )
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| StoreError::UnknownBackend(s.to_string()))
    }
}

/// Build a store of the given kind. Fails only on an invalid configuration.
pub fn build_storage(kind: BackendKind, config: &StoreConfig) -> StoreResult<Box<dyn StateStorage>> {
    config.validate()?;
    Ok(match kind {
        BackendKind::StdMap => Box::new(MapStore::new(config)),
        BackendKind::Cchm => Box::new(HashConsStore::new(config)),
        BackendKind::TreeStdMap => Box::new(TreeStore::over_stdmap(config)),
        BackendKind::TreeCchm => Box::new(TreeStore::over_cchm(config)),
        BackendKind::TreeMod => Box::new(TreeStore::shared_cchm(config)),
        BackendKind::DTree => Box::new(DTreeStore::new(config)),
    })
}
