//! SQLite persistence and the pushdown side of the filter engine.
//!
//! Writes go through immediately; visibility of a mutation to subsequent
//! reads in the same process therefore holds without an explicit flush
//! boundary (a stronger guarantee than the unit-of-work contract requires).
//! Referential cleanup on entity delete is performed here as well, mirroring
//! the in-memory purge: one statement removes the owned attributes together
//! with every relation attribute pointing at the deleted entity.

use rusqlite::{Connection, Row, params, params_from_iter};

use std::sync::Arc;

use crate::construct::{Attribute, Directory, Entity, Reference};
use crate::datatype::Value;
use crate::error::Result;
use crate::filter::{AttrFilter, Match, NumberMatch};

// ------------- Persistence -------------
pub struct Persistor {
    db: Connection,
}

impl Persistor {
    pub fn new(connection: Connection) -> Result<Persistor> {
        connection.execute_batch(
            "
            create table if not exists Entity (
                Entity_Name text not null,
                Entity_Kind text not null,
                Entity_Driver text not null,
                constraint unique_and_referenceable_Entity_Name primary key (
                    Entity_Name
                )
            );
            create table if not exists Attribute (
                Attr_Identity integer not null,
                Entity_Name text not null,
                Attr_Key text not null,
                Attr_Number integer null,
                Attr_Subkey text null,
                Value_Type integer not null,
                -- blob affinity, so stored values keep their own storage class
                Appearing_Value blob null,
                Relation text null,
                constraint Attribute_belongs_to_Entity foreign key (
                    Entity_Name
                ) references Entity(Entity_Name),
                constraint Relation_points_at_Entity foreign key (
                    Relation
                ) references Entity(Entity_Name),
                constraint referenceable_Attr_Identity primary key (
                    Attr_Identity
                )
            );
            ",
        )?;
        Ok(Persistor { db: connection })
    }

    pub fn persist_entity(&self, entity: &Entity) -> Result<()> {
        self.db
            .prepare_cached(
                "
                insert into Entity (
                    Entity_Name,
                    Entity_Kind,
                    Entity_Driver
                ) values (?, ?, ?)
            ",
            )?
            .execute(params![entity.name(), entity.kind(), entity.driver()])?;
        Ok(())
    }

    pub fn update_entity(&self, entity: &Entity) -> Result<()> {
        self.db
            .prepare_cached(
                "
                update Entity
                    set Entity_Kind = ?,
                        Entity_Driver = ?
                    where Entity_Name = ?
            ",
            )?
            .execute(params![entity.kind(), entity.driver(), entity.name()])?;
        Ok(())
    }

    pub fn remove_entity(&self, name: &str) -> Result<()> {
        self.db
            .prepare_cached(
                "
                delete from Attribute
                    where Entity_Name = ?1
                    or Relation = ?1
            ",
            )?
            .execute(params![name])?;
        self.db
            .prepare_cached(
                "
                delete from Entity
                    where Entity_Name = ?
            ",
            )?
            .execute(params![name])?;
        Ok(())
    }

    pub fn persist_attribute(&self, owner: &str, attribute: &Attribute) -> Result<()> {
        self.db
            .prepare_cached(
                "
                insert into Attribute (
                    Attr_Identity,
                    Entity_Name,
                    Attr_Key,
                    Attr_Number,
                    Attr_Subkey,
                    Value_Type,
                    Appearing_Value,
                    Relation
                ) values (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            )?
            .execute(params![
                attribute.id(),
                owner,
                attribute.key(),
                attribute.number(),
                attribute.subkey(),
                attribute.value().type_tag(),
                attribute.value(),
                attribute.value().as_relation(),
            ])?;
        Ok(())
    }

    pub fn remove_attribute(&self, id: u64) -> Result<()> {
        self.db
            .prepare_cached(
                "
                delete from Attribute
                    where Attr_Identity = ?
            ",
            )?
            .execute(params![id])?;
        Ok(())
    }

    pub fn restore_entities(&self, directory: &Directory) -> Result<usize> {
        let mut statement = self.db.prepare_cached(
            "
            select Entity_Name, Entity_Kind, Entity_Driver
                from Entity
        ",
        )?;
        let mut restored = 0;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let name: String = row.get(0)?;
            let kind: String = row.get(1)?;
            let driver: String = row.get(2)?;
            directory.keep_entity(Entity::new(name, kind, driver));
            restored += 1;
        }
        Ok(restored)
    }

    pub fn restore_attributes(&self, directory: &Directory) -> Result<usize> {
        let mut statement = self.db.prepare_cached(
            "
            select Attr_Identity, Entity_Name, Attr_Key, Attr_Number,
                    Attr_Subkey, Value_Type, Appearing_Value, Relation
                from Attribute
                order by Attr_Identity
        ",
        )?;
        let mut restored = 0;
        let mut rows = statement.query([])?;
        while let Some(row) = rows.next()? {
            let reference = decode_attribute_row(row)?;
            let attribute = reference.attr().as_ref().clone();
            directory.keep_attribute(reference.owner(), attribute);
            restored += 1;
        }
        Ok(restored)
    }

    /// Translate a filter to SQL and run it against the store. The WHERE
    /// clauses below mirror the in-memory evaluator predicate for predicate;
    /// GLOB (not LIKE) keeps pattern matching case sensitive on both paths,
    /// and the ORDER BY reproduces the stable key sort with insertion-id
    /// tie-break.
    pub fn attr_search(&self, filter: &AttrFilter, owner: Option<&str>) -> Result<Vec<Reference>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut arguments: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(owner) = owner {
            clauses.push("Entity_Name = ?");
            arguments.push(Box::new(owner.to_owned()));
        }
        match filter.key_match() {
            Some(Match::Exact(key)) => {
                clauses.push("Attr_Key = ?");
                arguments.push(Box::new(key.clone()));
            }
            Some(Match::Like(pattern)) => {
                clauses.push("Attr_Key glob ?");
                arguments.push(Box::new(glob_pattern(pattern)));
            }
            None => {}
        }
        match filter.subkey_match() {
            // comparison against a null subkey is null, which filters the
            // row out, agreeing with the in-memory "no subkey, no match"
            Some(Match::Exact(subkey)) => {
                clauses.push("Attr_Subkey = ?");
                arguments.push(Box::new(subkey.clone()));
            }
            Some(Match::Like(pattern)) => {
                clauses.push("Attr_Subkey glob ?");
                arguments.push(Box::new(glob_pattern(pattern)));
            }
            None => {}
        }
        match filter.value_match() {
            Some(Value::Relation(target)) => {
                clauses.push("Relation = ?");
                arguments.push(Box::new(target.clone()));
            }
            Some(value) => {
                clauses.push("Value_Type = ?");
                arguments.push(Box::new(value.type_tag()));
                clauses.push("Appearing_Value = ?");
                arguments.push(Box::new(value.clone()));
            }
            None => {}
        }
        match filter.number_match() {
            NumberMatch::Any => {}
            NumberMatch::Numbered => clauses.push("Attr_Number is not null"),
            NumberMatch::Unnumbered => clauses.push("Attr_Number is null"),
            NumberMatch::Exactly(n) => {
                clauses.push("Attr_Number = ?");
                arguments.push(Box::new(*n));
            }
        }
        if filter.effective_ignore_hidden() {
            clauses.push("Attr_Key not glob '_*'");
        }

        let mut sql = String::from(
            "select Attr_Identity, Entity_Name, Attr_Key, Attr_Number, \
             Attr_Subkey, Value_Type, Appearing_Value, Relation from Attribute",
        );
        if !clauses.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&clauses.join(" and "));
        }
        if filter.sorts_by_keys() {
            sql.push_str(" order by Attr_Key, Attr_Identity");
        } else {
            sql.push_str(" order by Attr_Identity");
        }

        let mut statement = self.db.prepare_cached(&sql)?;
        let mut result = Vec::new();
        let mut rows = statement.query(params_from_iter(arguments.iter().map(|a| a.as_ref())))?;
        while let Some(row) = rows.next()? {
            result.push(decode_attribute_row(row)?);
        }
        Ok(result)
    }
}

// In the filter language only `*` and `?` are special; GLOB additionally
// treats `[` as a character class, so it gets neutralized here.
fn glob_pattern(pattern: &str) -> String {
    pattern.replace('[', "[[]")
}

fn decode_attribute_row(row: &Row) -> Result<Reference> {
    let id: u64 = row.get(0)?;
    let owner: String = row.get(1)?;
    let key: String = row.get(2)?;
    let number: Option<i64> = row.get(3)?;
    let subkey: Option<String> = row.get(4)?;
    let tag: u8 = row.get(5)?;
    let relation: Option<String> = row.get(7)?;
    let value = Value::restore(tag, row.get_ref(6)?, relation)?;
    Ok(Reference::new(
        owner,
        Arc::new(Attribute::new(id, key, number, subkey, value)),
    ))
}
