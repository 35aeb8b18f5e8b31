//! Stowage – a small entity/attribute inventory core.
//!
//! Stowage models a collection of managed objects as generic entities with
//! typed attributes, and layers behavior on top of them through drivers:
//! * An [`construct::Entity`] is an identity-bearing record (name, kind,
//!   driver tag), persisted with nothing but those tags.
//! * An [`construct::Attribute`] is a typed fact attached to an entity,
//!   addressed by (key, number, subkey). A leading underscore in the key
//!   hides the attribute from default listings. A [`datatype::Value`] may be
//!   a relation pointing at another entity, creating a directed edge.
//! * A [`driver::Driver`] wraps one entity and exposes the attribute API;
//!   the concrete driver type is recovered at load time from the stored tag
//!   via a registry (see [`driver::wrap`]).
//! * [`pool`] builds containment on top of relation attributes, with three
//!   exclusivity policies (shared, unique, exclusive) and a breadth-first
//!   override traversal of an entity's parent pools.
//!
//! Entities and attributes are owned and deduplicated by "keeper" structures
//! (see the `construct` module) enabling canonical sharing through `Arc`,
//! with a reverse index over inbound relations for reference lookups.
//!
//! ## Modules
//! * [`construct`] – Entities, attributes, references, keepers, and the
//!   [`construct::Directory`] that wires them to persistence.
//! * [`datatype`] – The typed attribute [`datatype::Value`].
//! * [`filter`] – The attribute predicate language ([`filter::AttrFilter`])
//!   and its in-memory evaluator.
//! * [`driver`] – Driver registry, wrapping, and the attribute engine.
//! * [`pool`] – Pool containment variants and traversal.
//! * [`persist`] – SQLite persistence, restoration, and the pushdown side
//!   of the filter engine.
//! * [`settings`] – Layered configuration loading.
//!
//! ## Filtering
//! Filters are plain data evaluated two ways: in memory against one
//! entity's attributes, or pushed down as SQL across the whole store
//! ([`driver::get_by_attr`]). Both evaluations agree for every input.
//!
//! ## Persistence
//! The [`persist::Persistor`] encapsulates SQLite schema creation and
//! durable storage for entities and attributes. The
//! [`construct::Directory`] wires a persistor together with in-memory
//! keepers and restores prior state on startup.
//!
//! ## Quick Start
//! ```
//! use stowage::construct::{Directory, PersistenceMode};
//! use stowage::driver::{Driver, GenericDriver, Numbering};
//! use stowage::filter::AttrFilter;
//!
//! let directory = Directory::new(PersistenceMode::InMemory).unwrap();
//! let host = GenericDriver::create(&directory, "host1").unwrap();
//! host.add_attr("color", "blue".into(), Numbering::None, None).unwrap();
//! let found = host.attrs(&AttrFilter::new().key("color"));
//! assert_eq!(found.len(), 1);
//! ```

pub mod construct;
pub mod datatype;
pub mod driver;
pub mod error;
pub mod filter;
pub mod persist;
pub mod pool;
pub mod settings;
