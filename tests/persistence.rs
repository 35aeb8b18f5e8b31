use std::path::PathBuf;

use stowage::construct::{Directory, PersistenceMode};
use stowage::datatype::Value;
use stowage::driver::{Driver, GenericDriver, Numbering, wrap};
use stowage::filter::AttrFilter;

fn scratch_db(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("stowage_test_{}_{}.db", tag, std::process::id()))
}

#[test]
fn in_memory_mode_starts_empty() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    assert_eq!(directory.entity_count(), 0);
    assert_eq!(directory.attribute_count(), 0);
}

#[test]
fn file_mode_survives_a_reopen() {
    let path = scratch_db("reopen");
    let _ = std::fs::remove_file(&path);
    {
        let directory = Directory::new(PersistenceMode::File(path.clone())).unwrap();
        let host = GenericDriver::create(&directory, "host1").unwrap();
        host.add_attr("color", "blue".into(), Numbering::None, None).unwrap();
        host.add_attr("disk", "sda".into(), Numbering::Auto, Some("device")).unwrap();
    }
    let directory = Directory::new(PersistenceMode::File(path.clone())).unwrap();
    assert_eq!(directory.entity_count(), 1);
    assert_eq!(directory.attribute_count(), 2);
    let host = wrap(&directory, "host1").unwrap();
    let disks = host.attrs(&AttrFilter::new().key("disk"));
    assert_eq!(disks.len(), 1);
    assert_eq!(disks[0].number(), Some(0));
    assert_eq!(disks[0].subkey(), Some("device"));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn restored_ids_keep_the_generator_ahead() {
    let path = scratch_db("generator");
    let _ = std::fs::remove_file(&path);
    {
        let directory = Directory::new(PersistenceMode::File(path.clone())).unwrap();
        let host = GenericDriver::create(&directory, "host1").unwrap();
        host.add_attr("color", "blue".into(), Numbering::None, None).unwrap();
        host.add_attr("size", 4i64.into(), Numbering::None, None).unwrap();
    }
    let directory = Directory::new(PersistenceMode::File(path.clone())).unwrap();
    let host = wrap(&directory, "host1").unwrap();
    let fresh = host
        .add_attr("weight", 12i64.into(), Numbering::None, None)
        .unwrap();
    let old_ids: Vec<u64> = host
        .attrs(&AttrFilter::new())
        .iter()
        .filter(|a| a.key() != "weight")
        .map(|a| a.id())
        .collect();
    assert!(old_ids.iter().all(|id| *id < fresh.id()));
    let _ = std::fs::remove_file(&path);
}

#[test]
fn relations_and_pools_restore_intact() {
    let path = scratch_db("relations");
    let _ = std::fs::remove_file(&path);
    {
        let directory = Directory::new(PersistenceMode::File(path.clone())).unwrap();
        let host = GenericDriver::create(&directory, "host1").unwrap();
        let rack = stowage::pool::Pool::create(&directory, "rack1").unwrap();
        rack.insert(stowage::driver::Subject::Driver(&host)).unwrap();
        host.add_attr("owner", Value::relation("rack1"), Numbering::None, None)
            .unwrap();
    }
    let directory = Directory::new(PersistenceMode::File(path.clone())).unwrap();
    let host = wrap(&directory, "host1").unwrap();
    let rack = wrap(&directory, "rack1").unwrap();
    assert!(rack.is_pool());
    assert!(rack.contains(host.as_ref()));
    assert_eq!(rack.references(&AttrFilter::new()).len(), 1);
    let _ = std::fs::remove_file(&path);
}
