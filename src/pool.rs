//! Pool containment: grouping entities via hidden relation edges, with
//! three exclusivity policies layered on the base [`Driver::insert`].
//!
//! Membership is an auto-numbered hidden `_contains` relation attribute on
//! the pool, pointing at the member. A member's parent pools are therefore
//! its inbound `_contains` references whose owners are pool drivers. The
//! invariant enforced across all variants: an entity may never hold an
//! exclusive-pool membership together with any other pool membership.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::construct::Directory;
use crate::datatype::Value;
use crate::driver::{
    CONTAINS_KEY, Driver, DriverBase, Numbering, Subject, ensure_driver,
};
use crate::error::{PoolConflict, Result};
use crate::filter::AttrFilter;

/// The pools directly containing an entity, most recently inserted first
/// (descending insertion id of the `_contains` edge). Non-pool containers
/// are skipped.
pub fn direct_parent_pools(
    directory: &Arc<Directory>,
    name: &str,
) -> Result<Vec<Box<dyn Driver>>> {
    let filter = AttrFilter::new()
        .key(CONTAINS_KEY)
        .value(Value::relation(name))
        .unsorted();
    let mut edges = filter.apply_references(directory.references_of(name));
    edges.sort_by(|a, b| b.attr().id().cmp(&a.attr().id()));
    let mut parents = Vec::new();
    for edge in edges {
        let owner = crate::driver::wrap(directory, edge.owner())?;
        if owner.is_pool() {
            parents.push(owner);
        }
    }
    Ok(parents)
}

/// All pools containing an entity: the direct parents, or the full
/// breadth-first ancestor traversal when `all_pools`. Duplicates are kept
/// (a pool reachable along two paths appears twice); the pool graph is
/// assumed acyclic.
pub fn get_pools(
    directory: &Arc<Directory>,
    name: &str,
    all_pools: bool,
) -> Result<Vec<Box<dyn Driver>>> {
    iter_pools(directory, name, all_pools)?.collect()
}

/// Lazy, non-restartable breadth-first traversal over the pools containing
/// an entity, in override order: most recently inserted direct parent
/// first, then each yielded pool's own parents appended to the frontier in
/// the same rule.
pub fn iter_pools(
    directory: &Arc<Directory>,
    name: &str,
    all_pools: bool,
) -> Result<PoolIter> {
    Ok(PoolIter {
        directory: Arc::clone(directory),
        frontier: direct_parent_pools(directory, name)?.into(),
        all_pools,
    })
}

pub struct PoolIter {
    directory: Arc<Directory>,
    frontier: VecDeque<Box<dyn Driver>>,
    all_pools: bool,
}

impl Iterator for PoolIter {
    type Item = Result<Box<dyn Driver>>;

    fn next(&mut self) -> Option<Self::Item> {
        let pool = self.frontier.pop_front()?;
        if self.all_pools {
            match direct_parent_pools(&self.directory, pool.name()) {
                Ok(parents) => self.frontier.extend(parents),
                Err(error) => {
                    self.frontier.clear();
                    return Some(Err(error));
                }
            }
        }
        Some(Ok(pool))
    }
}

/// Fails when any pool containing the target, directly or through pool
/// ancestry, is exclusive. Every variant runs this before admitting a new
/// member.
fn check_exclusive_free(directory: &Arc<Directory>, target: &str) -> Result<()> {
    for parent in iter_pools(directory, target, true)? {
        let parent = parent?;
        if parent.tag() == ExclusivePool::TAG {
            debug!(pool = %parent.name(), member = target, "pool insert rejected");
            return Err(PoolConflict::InExclusivePool {
                target: target.to_owned(),
                pool: parent.name().to_owned(),
            }
            .into());
        }
    }
    Ok(())
}

/// The membership write shared by all variants: an auto-numbered hidden
/// `_contains` edge from the pool to the target. Callers hold the write
/// guard across their precondition check and this call.
fn contained_insert(base: &DriverBase, target: &dyn Driver) -> Result<()> {
    base.add_attr_unlocked(
        CONTAINS_KEY,
        Value::relation(target.name()),
        Numbering::Auto,
        None,
    )?;
    debug!(pool = %base.name(), member = %target.name(), "pool member added");
    Ok(())
}

// ------------- Pool -------------
/// Shared pool: entities may belong to many of these at once.
pub struct Pool {
    base: DriverBase,
}

impl Pool {
    pub const KIND: &'static str = "pool";
    pub const TAG: &'static str = "pool";

    pub fn create(directory: &Arc<Directory>, name: &str) -> Result<Pool> {
        directory.create_entity(name, Self::KIND, Self::TAG)?;
        Ok(Pool {
            base: DriverBase::new(directory, name),
        })
    }
    pub fn bind(directory: Arc<Directory>, name: String) -> Box<dyn Driver> {
        Box::new(Pool {
            base: DriverBase::bind(directory, name),
        })
    }
}

impl Driver for Pool {
    fn base(&self) -> &DriverBase {
        &self.base
    }
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn tag(&self) -> &'static str {
        Self::TAG
    }
    fn is_pool(&self) -> bool {
        true
    }
    fn insert(&self, thing: Subject<'_>) -> Result<()> {
        let _guard = self.directory().write_guard();
        let target = ensure_driver(self.directory(), thing)?;
        if self.base.contains_name(target.name()) {
            debug!(pool = %self.name(), member = %target.name(), "pool insert rejected");
            return Err(PoolConflict::AlreadyMember {
                target: target.name().to_owned(),
                pool: self.name().to_owned(),
            }
            .into());
        }
        check_exclusive_free(self.directory(), target.name())?;
        contained_insert(&self.base, target.as_ref())
    }
}

impl fmt::Display for Pool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}/{}]", self.base.name(), Self::KIND, Self::TAG)
    }
}

// ------------- UniquePool -------------
/// At most one membership per entity across pools carrying this tag.
pub struct UniquePool {
    base: DriverBase,
}

impl UniquePool {
    pub const KIND: &'static str = "pool";
    pub const TAG: &'static str = "unique_pool";

    pub fn create(directory: &Arc<Directory>, name: &str) -> Result<UniquePool> {
        directory.create_entity(name, Self::KIND, Self::TAG)?;
        Ok(UniquePool {
            base: DriverBase::new(directory, name),
        })
    }
    pub fn bind(directory: Arc<Directory>, name: String) -> Box<dyn Driver> {
        Box::new(UniquePool {
            base: DriverBase::bind(directory, name),
        })
    }
}

impl Driver for UniquePool {
    fn base(&self) -> &DriverBase {
        &self.base
    }
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn tag(&self) -> &'static str {
        Self::TAG
    }
    fn is_pool(&self) -> bool {
        true
    }
    fn insert(&self, thing: Subject<'_>) -> Result<()> {
        let _guard = self.directory().write_guard();
        let target = ensure_driver(self.directory(), thing)?;
        let unique_parents: Vec<String> = direct_parent_pools(self.directory(), target.name())?
            .iter()
            .filter(|parent| parent.tag() == self.tag())
            .map(|parent| parent.name().to_owned())
            .collect();
        if !unique_parents.is_empty() {
            debug!(pool = %self.name(), member = %target.name(), "pool insert rejected");
            return Err(PoolConflict::AlreadyUnique {
                target: target.name().to_owned(),
                pools: unique_parents,
            }
            .into());
        }
        check_exclusive_free(self.directory(), target.name())?;
        contained_insert(&self.base, target.as_ref())
    }
}

impl fmt::Display for UniquePool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}/{}]", self.base.name(), Self::KIND, Self::TAG)
    }
}

// ------------- ExclusivePool -------------
/// Membership here must be the entity's only pool membership, in either
/// direction: a member of an exclusive pool joins no other pool, and an
/// entity already pooled anywhere cannot join an exclusive pool.
pub struct ExclusivePool {
    base: DriverBase,
}

impl ExclusivePool {
    pub const KIND: &'static str = "pool";
    pub const TAG: &'static str = "exclusive_pool";

    pub fn create(directory: &Arc<Directory>, name: &str) -> Result<ExclusivePool> {
        directory.create_entity(name, Self::KIND, Self::TAG)?;
        Ok(ExclusivePool {
            base: DriverBase::new(directory, name),
        })
    }
    pub fn bind(directory: Arc<Directory>, name: String) -> Box<dyn Driver> {
        Box::new(ExclusivePool {
            base: DriverBase::bind(directory, name),
        })
    }
}

impl Driver for ExclusivePool {
    fn base(&self) -> &DriverBase {
        &self.base
    }
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn tag(&self) -> &'static str {
        Self::TAG
    }
    fn is_pool(&self) -> bool {
        true
    }
    fn insert(&self, thing: Subject<'_>) -> Result<()> {
        let _guard = self.directory().write_guard();
        let target = ensure_driver(self.directory(), thing)?;
        let pools = get_pools(self.directory(), target.name(), true)?;
        if !pools.is_empty() {
            debug!(pool = %self.name(), member = %target.name(), "pool insert rejected");
            return Err(PoolConflict::AlreadyPooled {
                target: target.name().to_owned(),
                pools: pools.iter().map(|p| p.name().to_owned()).collect(),
            }
            .into());
        }
        contained_insert(&self.base, target.as_ref())
    }
}

impl fmt::Display for ExclusivePool {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}/{}]", self.base.name(), Self::KIND, Self::TAG)
    }
}
