use std::sync::{Arc, Mutex, MutexGuard};

// keepers use HashMap with a fast hasher, keyed by entity name or attribute id
use core::hash::BuildHasherDefault;
use seahash::SeaHasher;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

// used to print out readable forms of a construct
use std::fmt;

use rusqlite::Connection;
use tracing::{debug, info};

// our own stuff that we need
use crate::datatype::Value;
use crate::error::{Result, StowageError};
use crate::filter::AttrFilter;
use crate::persist::Persistor;
use crate::settings::Settings;

pub type NameHasher = BuildHasherDefault<SeaHasher>;
pub type IdHasher = BuildHasherDefault<SeaHasher>;

// ------------- Attribute identity -------------
/// Monotone insertion id. Besides identifying an attribute it doubles as the
/// tie-break order for "most recently added first" traversals.
pub type AttrId = u64;

/// The addressing identity of an attribute: (key, number, subkey).
pub type KeyTuple = (String, Option<i64>, Option<String>);

#[derive(Debug)]
pub struct AttrIdGenerator {
    lower_bound: AttrId,
}
impl AttrIdGenerator {
    pub fn new() -> Self {
        Self { lower_bound: 0 }
    }
    // Ids are normally generated, but when restoring a persisted directory
    // the highest restored id becomes the new lower bound.
    pub fn retain(&mut self, id: AttrId) {
        if id > self.lower_bound {
            self.lower_bound = id;
        }
    }
    pub fn generate(&mut self) -> AttrId {
        self.lower_bound += 1;
        self.lower_bound
    }
}

// ------------- Entity -------------
/// The identity-bearing record for one managed object. The name is immutable
/// for the record's lifetime; reclassification replaces the whole record
/// (see [`Directory::reclassify`]) rather than mutating it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Entity {
    name: String,
    kind: String,
    driver: String,
}
impl Entity {
    pub fn new(name: impl Into<String>, kind: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            driver: driver.into(),
        }
    }
    // It's intentional to encapsulate the fields in the struct and only
    // expose them using "getters", because this yields true immutability
    // for objects after creation.
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn kind(&self) -> &str {
        &self.kind
    }
    pub fn driver(&self) -> &str {
        &self.driver
    }
}
impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} [{}/{}]", self.name, self.kind, self.driver)
    }
}

// ------------- Attribute -------------
/// A typed, optionally numbered/subkeyed fact attached to an entity.
/// Identity (key, number, subkey) and value are fixed at construction;
/// the update idiom is replace-all-then-insert, never in-place mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    id: AttrId,
    key: String,
    number: Option<i64>,
    subkey: Option<String>,
    value: Value,
}
impl Attribute {
    pub fn new(
        id: AttrId,
        key: impl Into<String>,
        number: Option<i64>,
        subkey: Option<String>,
        value: Value,
    ) -> Self {
        Self {
            id,
            key: key.into(),
            number,
            subkey,
            value,
        }
    }
    pub fn id(&self) -> AttrId {
        self.id
    }
    pub fn key(&self) -> &str {
        &self.key
    }
    pub fn number(&self) -> Option<i64> {
        self.number
    }
    pub fn subkey(&self) -> Option<&str> {
        self.subkey.as_deref()
    }
    pub fn value(&self) -> &Value {
        &self.value
    }
    /// Keys starting with `_` mark internal attributes, excluded from
    /// default listings.
    pub fn is_hidden(&self) -> bool {
        self.key.starts_with('_')
    }
    pub fn key_tuple(&self) -> KeyTuple {
        (self.key.clone(), self.number, self.subkey.clone())
    }
    /// The composed key as rendered for humans: `key`, `key3`, `key-sub`
    /// or `key3-sub`.
    pub fn rendered_key(&self) -> String {
        let mut rendered = self.key.clone();
        if let Some(number) = self.number {
            rendered.push_str(&number.to_string());
        }
        if let Some(subkey) = &self.subkey {
            rendered.push('-');
            rendered.push_str(subkey);
        }
        rendered
    }
}
impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} = {}", self.rendered_key(), self.value)
    }
}

// ------------- Reference -------------
/// An inbound relation attribute together with the entity that owns it.
/// This is how an entity sees the edges pointing at it.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference {
    owner: String,
    attr: Arc<Attribute>,
}
impl Reference {
    pub fn new(owner: impl Into<String>, attr: Arc<Attribute>) -> Self {
        Self {
            owner: owner.into(),
            attr,
        }
    }
    pub fn owner(&self) -> &str {
        &self.owner
    }
    pub fn attr(&self) -> &Arc<Attribute> {
        &self.attr
    }
}

// ------------- Keepers -------------
#[derive(Debug)]
pub struct EntityKeeper {
    kept: HashMap<String, Arc<Entity>, NameHasher>,
}
impl EntityKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
        }
    }
    pub fn keep(&mut self, entity: Entity) -> (Arc<Entity>, bool) {
        let name = entity.name().to_owned();
        let mut previously_kept = true;
        let kept_entity = self
            .kept
            .entry(name)
            .or_insert_with(|| {
                previously_kept = false;
                Arc::new(entity)
            });
        (Arc::clone(kept_entity), previously_kept)
    }
    pub fn get(&self, name: &str) -> Option<Arc<Entity>> {
        self.kept.get(name).cloned()
    }
    /// Swap in a new record under the same name (reclassification).
    pub fn replace(&mut self, entity: Entity) -> Arc<Entity> {
        let replacement = Arc::new(entity);
        self.kept
            .insert(replacement.name().to_owned(), Arc::clone(&replacement));
        replacement
    }
    pub fn remove(&mut self, name: &str) -> Option<Arc<Entity>> {
        self.kept.remove(name)
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
}

#[derive(Debug)]
pub struct AttributeKeeper {
    // per-entity attribute lists, insertion order preserved
    kept: HashMap<String, Vec<Arc<Attribute>>, NameHasher>,
    // reverse index: relation target -> inbound references
    inbound: HashMap<String, Vec<Reference>, NameHasher>,
}
impl AttributeKeeper {
    pub fn new() -> Self {
        Self {
            kept: HashMap::default(),
            inbound: HashMap::default(),
        }
    }
    pub fn keep(&mut self, owner: &str, attribute: Arc<Attribute>) {
        if let Value::Relation(target) = attribute.value() {
            self.inbound
                .entry(target.clone())
                .or_default()
                .push(Reference::new(owner, Arc::clone(&attribute)));
        }
        self.kept
            .entry(owner.to_owned())
            .or_default()
            .push(attribute);
    }
    pub fn of(&self, owner: &str) -> Vec<Arc<Attribute>> {
        self.kept.get(owner).cloned().unwrap_or_default()
    }
    pub fn inbound_of(&self, target: &str) -> Vec<Reference> {
        self.inbound.get(target).cloned().unwrap_or_default()
    }
    fn unindex(&mut self, target: &str, id: AttrId) {
        if let Some(references) = self.inbound.get_mut(target) {
            references.retain(|r| r.attr().id() != id);
            if references.is_empty() {
                self.inbound.remove(target);
            }
        }
    }
    /// Remove the given attributes from an owner, keeping the inbound index
    /// consistent. Returns the removed attributes.
    pub fn remove(&mut self, owner: &str, ids: &HashSet<AttrId, IdHasher>) -> Vec<Arc<Attribute>> {
        let Some(list) = self.kept.get_mut(owner) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        list.retain(|attr| {
            if ids.contains(&attr.id()) {
                removed.push(Arc::clone(attr));
                false
            } else {
                true
            }
        });
        for attr in &removed {
            if let Value::Relation(target) = attr.value().clone() {
                self.unindex(&target, attr.id());
            }
        }
        removed
    }
    /// Drop everything touching an entity: the attributes it owns and every
    /// attribute elsewhere whose relation value points at it. Returns both
    /// groups so the caller can mirror the purge in persistence.
    pub fn purge_entity(&mut self, name: &str) -> (Vec<Arc<Attribute>>, Vec<Reference>) {
        let owned = self.kept.remove(name).unwrap_or_default();
        for attr in &owned {
            if let Value::Relation(target) = attr.value().clone() {
                self.unindex(&target, attr.id());
            }
        }
        let inbound = self.inbound.remove(name).unwrap_or_default();
        for reference in &inbound {
            if let Some(list) = self.kept.get_mut(reference.owner()) {
                list.retain(|attr| attr.id() != reference.attr().id());
            }
        }
        (owned, inbound)
    }
    pub fn len(&self) -> usize {
        self.kept.values().map(Vec::len).sum()
    }
}

// ------------- Directory -------------
#[derive(Debug, Clone)]
pub enum PersistenceMode {
    InMemory,
    File(PathBuf),
}

/// The directory wires the in-memory keepers to a persistor and is shared by
/// every driver through an `Arc`. All composite check-then-act mutations go
/// through [`Directory::write_guard`], held across the check and the write.
pub struct Directory {
    // owns an id generator for attribute insertion ids
    pub attr_id_generator: Arc<Mutex<AttrIdGenerator>>,
    // owns keepers for the available constructs
    pub entity_keeper: Arc<Mutex<EntityKeeper>>,
    pub attribute_keeper: Arc<Mutex<AttributeKeeper>>,
    // responsible for the persistence layer
    pub persistor: Arc<Mutex<Persistor>>,
    // serializes composite check-then-act mutations
    write_lock: Mutex<()>,
}

impl Directory {
    pub fn new(mode: PersistenceMode) -> Result<Arc<Directory>> {
        let connection = match &mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        let persistor = Persistor::new(connection)?;

        // Create the directory so that persisted state can be restored into it
        let directory = Arc::new(Directory {
            attr_id_generator: Arc::new(Mutex::new(AttrIdGenerator::new())),
            entity_keeper: Arc::new(Mutex::new(EntityKeeper::new())),
            attribute_keeper: Arc::new(Mutex::new(AttributeKeeper::new())),
            persistor: Arc::new(Mutex::new(persistor)),
            write_lock: Mutex::new(()),
        });

        // Restore the existing directory
        directory.persistor.lock().unwrap().restore_entities(&directory)?;
        directory
            .persistor
            .lock()
            .unwrap()
            .restore_attributes(&directory)?;

        info!(
            entities = directory.entity_count(),
            attributes = directory.attribute_count(),
            "directory ready"
        );
        Ok(directory)
    }
    pub fn from_settings(settings: &Settings) -> Result<Arc<Directory>> {
        Directory::new(settings.persistence_mode())
    }

    /// Guard for composite check-then-act mutations. Primitive mutators do
    /// not take it themselves; composite callers hold it across check+write.
    pub fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap()
    }

    // keeper-level primitives that do not persist, used when restoring
    pub fn keep_entity(&self, entity: Entity) -> (Arc<Entity>, bool) {
        self.entity_keeper.lock().unwrap().keep(entity)
    }
    pub fn keep_attribute(&self, owner: &str, attribute: Attribute) -> Arc<Attribute> {
        self.attr_id_generator.lock().unwrap().retain(attribute.id());
        let kept = Arc::new(attribute);
        self.attribute_keeper
            .lock()
            .unwrap()
            .keep(owner, Arc::clone(&kept));
        kept
    }

    pub fn entity(&self, name: &str) -> Option<Arc<Entity>> {
        self.entity_keeper.lock().unwrap().get(name)
    }
    pub fn entity_count(&self) -> usize {
        self.entity_keeper.lock().unwrap().len()
    }
    pub fn attribute_count(&self) -> usize {
        self.attribute_keeper.lock().unwrap().len()
    }

    pub fn create_entity(&self, name: &str, kind: &str, driver: &str) -> Result<Arc<Entity>> {
        if self.entity(name).is_some() {
            return Err(StowageError::Duplicate(name.to_owned()));
        }
        let entity = Entity::new(name, kind, driver);
        self.persistor.lock().unwrap().persist_entity(&entity)?;
        let (kept, _) = self.keep_entity(entity);
        debug!(entity = %kept, "entity created");
        Ok(kept)
    }

    /// Replace the stored kind/driver tags of an entity. The next `wrap`
    /// resolves to the newly stored driver.
    pub fn reclassify(&self, name: &str, kind: &str, driver: &str) -> Result<Arc<Entity>> {
        if self.entity(name).is_none() {
            return Err(StowageError::UnknownEntity(name.to_owned()));
        }
        let entity = Entity::new(name, kind, driver);
        self.persistor.lock().unwrap().update_entity(&entity)?;
        let replaced = self.entity_keeper.lock().unwrap().replace(entity);
        debug!(entity = %replaced, "entity reclassified");
        Ok(replaced)
    }

    /// Delete an entity, its attributes, and every relation attribute
    /// elsewhere that points at it. The referential scan-and-purge is done
    /// here rather than delegated to the storage engine.
    pub fn delete_entity(&self, name: &str) -> Result<()> {
        let _guard = self.write_guard();
        self.delete_entity_unlocked(name)
    }
    pub(crate) fn delete_entity_unlocked(&self, name: &str) -> Result<()> {
        if self.entity(name).is_none() {
            return Err(StowageError::UnknownEntity(name.to_owned()));
        }
        let (owned, inbound) = self.attribute_keeper.lock().unwrap().purge_entity(name);
        self.entity_keeper.lock().unwrap().remove(name);
        self.persistor.lock().unwrap().remove_entity(name)?;
        debug!(
            entity = name,
            owned = owned.len(),
            inbound = inbound.len(),
            "entity deleted"
        );
        Ok(())
    }

    pub fn attributes_of(&self, name: &str) -> Vec<Arc<Attribute>> {
        self.attribute_keeper.lock().unwrap().of(name)
    }
    pub fn references_of(&self, name: &str) -> Vec<Reference> {
        self.attribute_keeper.lock().unwrap().inbound_of(name)
    }

    /// Append a new attribute to an entity and persist it. Relation values
    /// must point at an existing entity; validation happens before any
    /// mutation.
    pub fn append_attribute(
        &self,
        owner: &str,
        key: &str,
        number: Option<i64>,
        subkey: Option<String>,
        value: Value,
    ) -> Result<Arc<Attribute>> {
        if self.entity(owner).is_none() {
            return Err(StowageError::UnknownEntity(owner.to_owned()));
        }
        if let Some(target) = value.as_relation() {
            if self.entity(target).is_none() {
                return Err(StowageError::UnknownEntity(target.to_owned()));
            }
        }
        let id = self.attr_id_generator.lock().unwrap().generate();
        let attribute = Attribute::new(id, key, number, subkey, value);
        self.persistor
            .lock()
            .unwrap()
            .persist_attribute(owner, &attribute)?;
        let kept = Arc::new(attribute);
        self.attribute_keeper
            .lock()
            .unwrap()
            .keep(owner, Arc::clone(&kept));
        Ok(kept)
    }

    pub fn remove_attributes(
        &self,
        owner: &str,
        ids: &HashSet<AttrId, IdHasher>,
    ) -> Result<usize> {
        let removed = self.attribute_keeper.lock().unwrap().remove(owner, ids);
        let persistor = self.persistor.lock().unwrap();
        for attr in &removed {
            persistor.remove_attribute(attr.id())?;
        }
        Ok(removed.len())
    }

    /// Pushdown evaluation of a filter against the persistent store, across
    /// all entities or restricted to one owner. Must agree with the
    /// in-memory evaluator in [`crate::filter`] for every input.
    pub fn attr_search(&self, filter: &AttrFilter, owner: Option<&str>) -> Result<Vec<Reference>> {
        self.persistor.lock().unwrap().attr_search(filter, owner)
    }
}
