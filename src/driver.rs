//! Driver resolution and the attribute-manipulation API.
//!
//! Entities are persisted with nothing but a driver tag; behavior is
//! recovered at load time by a two-phase factory: [`wrap`] loads the raw
//! record, resolves the stored tag in the registry, and constructs the
//! registered concrete type ("best available driver"). A wrapper's type is
//! never changed after construction.
//!
//! The registry is seeded with the builtin drivers and is meant to be
//! extended only during process initialization, via [`register_driver`].

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::construct::{AttrId, Attribute, Directory, IdHasher, KeyTuple, Reference};
use crate::datatype::Value;
use crate::error::{Result, StowageError};
use crate::filter::{AttrFilter, NumberMatch};
use crate::pool;

/// Hidden key under which containment edges are stored.
pub const CONTAINS_KEY: &str = "_contains";

lazy_static! {
    static ref VALID_ATTR_KEY: Regex = Regex::new("^[A-Za-z_][0-9A-Za-z_]*$").unwrap();
}

/// Attribute keys (and subkeys) must be identifier-like; a leading
/// underscore marks the attribute hidden. Checked before any mutation.
pub fn check_attr_name(key: &str) -> Result<()> {
    if VALID_ATTR_KEY.is_match(key) {
        Ok(())
    } else {
        Err(StowageError::Naming { key: key.to_owned() })
    }
}

/// How an added attribute is numbered: not at all, the next ordinal under
/// its key, or a caller-chosen ordinal stored verbatim.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numbering {
    None,
    Auto,
    At(i64),
}

/// An entity given either by name or as an already-wrapped driver.
pub enum Subject<'a> {
    Name(&'a str),
    Driver(&'a dyn Driver),
}

// ------------- Registry -------------
pub type DriverConstructor = fn(Arc<Directory>, String) -> Box<dyn Driver>;

lazy_static! {
    static ref REGISTRY: Mutex<HashMap<String, DriverConstructor>> = {
        let mut kept: HashMap<String, DriverConstructor> = HashMap::new();
        kept.insert(GenericDriver::TAG.to_owned(), GenericDriver::bind as DriverConstructor);
        kept.insert(pool::Pool::TAG.to_owned(), pool::Pool::bind as DriverConstructor);
        kept.insert(
            pool::UniquePool::TAG.to_owned(),
            pool::UniquePool::bind as DriverConstructor,
        );
        kept.insert(
            pool::ExclusivePool::TAG.to_owned(),
            pool::ExclusivePool::bind as DriverConstructor,
        );
        Mutex::new(kept)
    };
}

pub fn register_driver(tag: &str, constructor: DriverConstructor) {
    REGISTRY.lock().unwrap().insert(tag.to_owned(), constructor);
}

pub fn resolve_driver(tag: &str) -> Result<DriverConstructor> {
    REGISTRY
        .lock()
        .unwrap()
        .get(tag)
        .copied()
        .ok_or_else(|| StowageError::UnknownDriver(tag.to_owned()))
}

/// Wrap an existing entity in its best available driver: the concrete type
/// registered under the entity's STORED tag, which may be more specific than
/// whatever the caller nominally expected.
pub fn wrap(directory: &Arc<Directory>, name: &str) -> Result<Box<dyn Driver>> {
    let entity = directory
        .entity(name)
        .ok_or_else(|| StowageError::UnknownEntity(name.to_owned()))?;
    let constructor = resolve_driver(entity.driver())?;
    Ok(constructor(Arc::clone(directory), name.to_owned()))
}

/// Resolve an entity-or-driver argument to a wrapped driver.
pub fn ensure_driver(directory: &Arc<Directory>, subject: Subject<'_>) -> Result<Box<dyn Driver>> {
    match subject {
        Subject::Name(name) => wrap(directory, name),
        Subject::Driver(driver) => wrap(directory, driver.name()),
    }
}

/// Pushdown lookup: evaluate the filter against the store across all
/// entities and return the owners of matching attributes, driver-wrapped,
/// in attribute match order (duplicates preserved).
pub fn get_by_attr(directory: &Arc<Directory>, filter: &AttrFilter) -> Result<Vec<Box<dyn Driver>>> {
    directory
        .attr_search(filter, None)?
        .into_iter()
        .map(|reference| wrap(directory, reference.owner()))
        .collect()
}

// ------------- DriverBase -------------
/// The shared state of every driver: the directory and the wrapped entity's
/// name. Carries the whole attribute engine; concrete drivers delegate here.
#[derive(Clone)]
pub struct DriverBase {
    directory: Arc<Directory>,
    name: String,
}

impl DriverBase {
    pub fn new(directory: &Arc<Directory>, name: &str) -> Self {
        Self {
            directory: Arc::clone(directory),
            name: name.to_owned(),
        }
    }
    /// Binding form used by registry constructors, which receive owned parts.
    pub fn bind(directory: Arc<Directory>, name: String) -> Self {
        Self { directory, name }
    }
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attrs(&self, filter: &AttrFilter) -> Vec<Arc<Attribute>> {
        filter.apply(&self.directory.attributes_of(&self.name))
    }
    pub fn has_attr(&self, filter: &AttrFilter) -> bool {
        filter.matches_any(&self.directory.attributes_of(&self.name))
    }
    pub fn references(&self, filter: &AttrFilter) -> Vec<Reference> {
        filter.apply_references(self.directory.references_of(&self.name))
    }

    pub fn add_attr(
        &self,
        key: &str,
        value: Value,
        numbering: Numbering,
        subkey: Option<&str>,
    ) -> Result<Arc<Attribute>> {
        let _guard = self.directory.write_guard();
        self.add_attr_unlocked(key, value, numbering, subkey)
    }
    pub(crate) fn add_attr_unlocked(
        &self,
        key: &str,
        value: Value,
        numbering: Numbering,
        subkey: Option<&str>,
    ) -> Result<Arc<Attribute>> {
        check_attr_name(key)?;
        if let Some(subkey) = subkey {
            check_attr_name(subkey)?;
        }
        let number = match numbering {
            Numbering::None => None,
            // the next ordinal is the count of attributes already numbered
            // under this key, recomputed from current state
            Numbering::Auto => Some(self.numbered_count(key) as i64),
            Numbering::At(n) if n < 0 => {
                return Err(StowageError::Type(format!(
                    "attribute number must be non-negative, got {n}"
                )));
            }
            Numbering::At(n) => Some(n),
        };
        let attribute = self.directory.append_attribute(
            &self.name,
            key,
            number,
            subkey.map(str::to_owned),
            value,
        )?;
        debug!(entity = %self.name, key, "attribute added");
        Ok(attribute)
    }
    fn numbered_count(&self, key: &str) -> usize {
        self.attrs(
            &AttrFilter::new()
                .key(key)
                .number(NumberMatch::Numbered)
                .unsorted(),
        )
        .len()
    }

    pub fn del_attrs(&self, filter: &AttrFilter) -> Result<usize> {
        let _guard = self.directory.write_guard();
        self.del_attrs_unlocked(filter)
    }
    pub(crate) fn del_attrs_unlocked(&self, filter: &AttrFilter) -> Result<usize> {
        let ids: HashSet<AttrId, IdHasher> =
            self.attrs(filter).iter().map(|attr| attr.id()).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        self.directory.remove_attributes(&self.name, &ids)
    }

    /// Replace every attribute matching (key, numbering, subkey) with the
    /// new value. Not atomic across a mid-failure: if the delete lands and
    /// the add fails, the attribute ends up absent.
    pub fn set_attr(
        &self,
        key: &str,
        value: Value,
        numbering: Numbering,
        subkey: Option<&str>,
    ) -> Result<Arc<Attribute>> {
        let _guard = self.directory.write_guard();
        check_attr_name(key)?;
        let mut matching = AttrFilter::new().key(key);
        match numbering {
            Numbering::None => {}
            Numbering::Auto => matching = matching.number(NumberMatch::Numbered),
            Numbering::At(n) => matching = matching.number(NumberMatch::Exactly(n)),
        }
        if let Some(subkey) = subkey {
            matching = matching.subkey(subkey);
        }
        self.del_attrs_unlocked(&matching)?;
        self.add_attr_unlocked(key, value, numbering, subkey)
    }

    pub fn contains_name(&self, other: &str) -> bool {
        self.has_attr(&AttrFilter::new().key(CONTAINS_KEY).value(Value::relation(other)))
    }
}

impl fmt::Display for DriverBase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

impl fmt::Debug for DriverBase {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("DriverBase").field("name", &self.name).finish_non_exhaustive()
    }
}

// ------------- Driver -------------
/// The polymorphic behavior wrapper bound to one entity. Everything but the
/// identity methods is provided, delegating to [`DriverBase`]; pool variants
/// override `insert` with their containment preconditions.
pub trait Driver: fmt::Display {
    fn base(&self) -> &DriverBase;
    /// Declared type tag, stamped on entities this driver creates.
    fn kind(&self) -> &'static str;
    /// Declared driver tag, the registry key.
    fn tag(&self) -> &'static str;
    fn is_pool(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        self.base().name()
    }
    fn directory(&self) -> &Arc<Directory> {
        self.base().directory()
    }

    /// Filtered view of the wrapped entity's attributes.
    fn attrs(&self, filter: &AttrFilter) -> Vec<Arc<Attribute>> {
        self.base().attrs(filter)
    }
    fn attr_keys(&self, filter: &AttrFilter) -> Vec<String> {
        self.attrs(filter)
            .iter()
            .map(|attr| attr.key().to_owned())
            .collect()
    }
    fn attr_key_tuples(&self, filter: &AttrFilter) -> Vec<KeyTuple> {
        self.attrs(filter).iter().map(|attr| attr.key_tuple()).collect()
    }
    fn attr_items(&self, filter: &AttrFilter) -> Vec<(KeyTuple, Value)> {
        self.attrs(filter)
            .iter()
            .map(|attr| (attr.key_tuple(), attr.value().clone()))
            .collect()
    }
    fn add_attr(
        &self,
        key: &str,
        value: Value,
        numbering: Numbering,
        subkey: Option<&str>,
    ) -> Result<Arc<Attribute>> {
        self.base().add_attr(key, value, numbering, subkey)
    }
    fn del_attrs(&self, filter: &AttrFilter) -> Result<usize> {
        self.base().del_attrs(filter)
    }
    fn set_attr(
        &self,
        key: &str,
        value: Value,
        numbering: Numbering,
        subkey: Option<&str>,
    ) -> Result<Arc<Attribute>> {
        self.base().set_attr(key, value, numbering, subkey)
    }
    /// True iff any attribute matches; short-circuits.
    fn has_attr(&self, filter: &AttrFilter) -> bool {
        self.base().has_attr(filter)
    }
    /// Inbound relation attributes pointing at this entity.
    fn references(&self, filter: &AttrFilter) -> Vec<Reference> {
        self.base().references(filter)
    }
    /// References, additionally restricted by the referring entity's stored
    /// kind and/or driver tag.
    fn references_from(
        &self,
        filter: &AttrFilter,
        kind: Option<&str>,
        tag: Option<&str>,
    ) -> Vec<Reference> {
        self.base()
            .references(filter)
            .into_iter()
            .filter(|reference| match self.directory().entity(reference.owner()) {
                Some(entity) => {
                    kind.is_none_or(|k| entity.kind() == k)
                        && tag.is_none_or(|t| entity.driver() == t)
                }
                None => false,
            })
            .collect()
    }

    /// Drivers are equal when they wrap the same entity name.
    fn equals(&self, other: &dyn Driver) -> bool {
        self.name() == other.name()
    }
    /// Drivers wrapped around the entities this one directly contains.
    fn contents(&self) -> Result<Vec<Box<dyn Driver>>> {
        self.attrs(&AttrFilter::new().key(CONTAINS_KEY).unsorted())
            .iter()
            .filter_map(|attr| attr.value().as_relation())
            .map(|target| wrap(self.directory(), target))
            .collect()
    }
    /// Direct containment test via the `_contains` edge.
    fn contains(&self, other: &dyn Driver) -> bool {
        self.base().contains_name(other.name())
    }
    /// Base containment: add an unnumbered hidden `_contains` edge. Pool
    /// variants override this with their preconditions and numbered edges.
    fn insert(&self, thing: Subject<'_>) -> Result<()> {
        let _guard = self.directory().write_guard();
        let target = ensure_driver(self.directory(), thing)?;
        self.base().add_attr_unlocked(
            CONTAINS_KEY,
            Value::relation(target.name()),
            Numbering::None,
            None,
        )?;
        Ok(())
    }
    /// True iff this driver is a direct parent pool of the given subject.
    fn is_parent(&self, thing: Subject<'_>) -> Result<bool> {
        let target = ensure_driver(self.directory(), thing)?;
        Ok(pool::direct_parent_pools(self.directory(), target.name())?
            .iter()
            .any(|parent| parent.name() == self.name()))
    }
    /// Breadth-first traversal of the pools containing this entity, most
    /// recently inserted direct parent first.
    fn iter_pools(&self, all_pools: bool) -> Result<pool::PoolIter> {
        pool::iter_pools(self.directory(), self.name(), all_pools)
    }
    /// Delete the wrapped entity, with referential cleanup.
    fn delete(&self) -> Result<()> {
        self.directory().delete_entity(self.name())
    }
}

impl fmt::Debug for dyn Driver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("tag", &self.tag())
            .finish()
    }
}

// ------------- GenericDriver -------------
/// The catch-all driver for entities with no specialized behavior.
#[derive(Debug)]
pub struct GenericDriver {
    base: DriverBase,
}

impl GenericDriver {
    pub const KIND: &'static str = "generic";
    pub const TAG: &'static str = "entity";

    /// Create a brand-new entity stamped with this driver's declared tags.
    pub fn create(directory: &Arc<Directory>, name: &str) -> Result<GenericDriver> {
        directory.create_entity(name, Self::KIND, Self::TAG)?;
        Ok(GenericDriver {
            base: DriverBase::new(directory, name),
        })
    }
    pub fn bind(directory: Arc<Directory>, name: String) -> Box<dyn Driver> {
        Box::new(GenericDriver {
            base: DriverBase::bind(directory, name),
        })
    }
}

impl Driver for GenericDriver {
    fn base(&self) -> &DriverBase {
        &self.base
    }
    fn kind(&self) -> &'static str {
        Self::KIND
    }
    fn tag(&self) -> &'static str {
        Self::TAG
    }
}

impl fmt::Display for GenericDriver {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}/{}]", self.base.name(), Self::KIND, Self::TAG)
    }
}
