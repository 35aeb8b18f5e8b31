use stowage::construct::{Directory, PersistenceMode};
use stowage::driver::{GenericDriver, Subject};
use stowage::pool::{Pool, direct_parent_pools, get_pools};

/// Build the reference containment graph: X in pools A, B, C (inserted in
/// that order); A in A1 then B2; B in B1 then A1; C in C1.
fn build_graph(directory: &std::sync::Arc<Directory>) {
    GenericDriver::create(directory, "X").unwrap();
    for name in ["A", "B", "C", "A1", "B2", "B1", "C1"] {
        Pool::create(directory, name).unwrap();
    }
    for (pool, member) in [
        ("A", "X"),
        ("B", "X"),
        ("C", "X"),
        ("A1", "A"),
        ("B2", "A"),
        ("B1", "B"),
        ("A1", "B"),
        ("C1", "C"),
    ] {
        let pool = stowage::driver::wrap(directory, pool).unwrap();
        pool.insert(Subject::Name(member)).unwrap();
    }
}

#[test]
fn direct_parents_come_most_recent_first() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    build_graph(&directory);
    let names: Vec<String> = direct_parent_pools(&directory, "X")
        .unwrap()
        .iter()
        .map(|p| p.name().to_owned())
        .collect();
    assert_eq!(names, vec!["C", "B", "A"]);
}

#[test]
fn traversal_is_breadth_first_in_override_order() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    build_graph(&directory);
    let x = stowage::driver::wrap(&directory, "X").unwrap();
    let names: Vec<String> = x
        .iter_pools(true)
        .unwrap()
        .map(|p| p.map(|p| p.name().to_owned()))
        .collect::<stowage::error::Result<_>>()
        .unwrap();
    // a pool reachable along two paths (A1) appears once per path
    assert_eq!(names, vec!["C", "B", "A", "C1", "A1", "B1", "B2", "A1"]);
}

#[test]
fn direct_only_traversal_stops_at_the_first_level() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    build_graph(&directory);
    let names: Vec<String> = get_pools(&directory, "X", false)
        .unwrap()
        .iter()
        .map(|p| p.name().to_owned())
        .collect();
    assert_eq!(names, vec!["C", "B", "A"]);
}

#[test]
fn pools_of_an_unpooled_entity_are_empty() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    GenericDriver::create(&directory, "lonely").unwrap();
    assert!(get_pools(&directory, "lonely", true).unwrap().is_empty());
}
