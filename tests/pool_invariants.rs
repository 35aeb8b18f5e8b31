use stowage::construct::{Directory, PersistenceMode};
use stowage::driver::{Driver, GenericDriver, Subject};
use stowage::error::{PoolConflict, StowageError};
use stowage::pool::{ExclusivePool, Pool, UniquePool, direct_parent_pools};

fn pool_conflict(err: StowageError) -> PoolConflict {
    match err {
        StowageError::Pool(conflict) => conflict,
        other => panic!("expected a pool conflict, got {other}"),
    }
}

#[test]
fn double_insert_into_the_same_pool_fails() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let p = Pool::create(&directory, "p").unwrap();
    p.insert(Subject::Driver(&x)).unwrap();
    let conflict = pool_conflict(p.insert(Subject::Driver(&x)).unwrap_err());
    assert!(matches!(conflict, PoolConflict::AlreadyMember { .. }));
    // membership in several plain pools is fine
    let q = Pool::create(&directory, "q").unwrap();
    q.insert(Subject::Driver(&x)).unwrap();
}

#[test]
fn exclusive_membership_blocks_every_other_pool() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let vault = ExclusivePool::create(&directory, "vault").unwrap();
    vault.insert(Subject::Driver(&x)).unwrap();

    let p = Pool::create(&directory, "p").unwrap();
    let u = UniquePool::create(&directory, "u").unwrap();
    let vault2 = ExclusivePool::create(&directory, "vault2").unwrap();
    for err in [
        p.insert(Subject::Driver(&x)).unwrap_err(),
        u.insert(Subject::Driver(&x)).unwrap_err(),
        vault2.insert(Subject::Driver(&x)).unwrap_err(),
    ] {
        let conflict = pool_conflict(err);
        assert!(
            matches!(
                conflict,
                PoolConflict::InExclusivePool { .. } | PoolConflict::AlreadyPooled { .. }
            ),
            "unexpected conflict {conflict}"
        );
    }
}

#[test]
fn pooled_entities_cannot_join_an_exclusive_pool() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let p = Pool::create(&directory, "p").unwrap();
    p.insert(Subject::Driver(&x)).unwrap();

    let vault = ExclusivePool::create(&directory, "vault").unwrap();
    let conflict = pool_conflict(vault.insert(Subject::Driver(&x)).unwrap_err());
    match conflict {
        PoolConflict::AlreadyPooled { target, pools } => {
            assert_eq!(target, "x");
            assert_eq!(pools, vec!["p".to_owned()]);
        }
        other => panic!("expected AlreadyPooled, got {other}"),
    }
}

#[test]
fn unique_pools_admit_one_membership_per_tag() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let u1 = UniquePool::create(&directory, "u1").unwrap();
    let u2 = UniquePool::create(&directory, "u2").unwrap();
    u1.insert(Subject::Driver(&x)).unwrap();
    let conflict = pool_conflict(u2.insert(Subject::Driver(&x)).unwrap_err());
    assert!(matches!(conflict, PoolConflict::AlreadyUnique { .. }));
    // a plain pool membership can still be added alongside the unique one
    let p = Pool::create(&directory, "p").unwrap();
    p.insert(Subject::Driver(&x)).unwrap();
}

#[test]
fn exclusivity_is_checked_through_pool_ancestry() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let p = Pool::create(&directory, "p").unwrap();
    let vault = ExclusivePool::create(&directory, "vault").unwrap();
    p.insert(Subject::Driver(&x)).unwrap();
    vault.insert(Subject::Name("p")).unwrap();

    // x sits inside an exclusive pool via p, so no further memberships
    let q = Pool::create(&directory, "q").unwrap();
    let conflict = pool_conflict(q.insert(Subject::Driver(&x)).unwrap_err());
    match conflict {
        PoolConflict::InExclusivePool { target, pool } => {
            assert_eq!(target, "x");
            assert_eq!(pool, "vault");
        }
        other => panic!("expected InExclusivePool, got {other}"),
    }
}

#[test]
fn insert_accepts_names_and_checks_existence() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    GenericDriver::create(&directory, "x").unwrap();
    let p = Pool::create(&directory, "p").unwrap();
    p.insert(Subject::Name("x")).unwrap();
    assert!(matches!(
        p.insert(Subject::Name("ghost")).unwrap_err(),
        StowageError::UnknownEntity(_)
    ));
}

#[test]
fn is_parent_sees_direct_containment_only() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let inner = Pool::create(&directory, "inner").unwrap();
    let outer = Pool::create(&directory, "outer").unwrap();
    inner.insert(Subject::Driver(&x)).unwrap();
    outer.insert(Subject::Driver(&inner)).unwrap();

    assert!(inner.is_parent(Subject::Driver(&x)).unwrap());
    assert!(!outer.is_parent(Subject::Driver(&x)).unwrap());
    assert!(outer.is_parent(Subject::Name("inner")).unwrap());
}

#[test]
fn non_pool_containers_are_not_parent_pools() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let x = GenericDriver::create(&directory, "x").unwrap();
    let box_driver = GenericDriver::create(&directory, "box").unwrap();
    box_driver.insert(Subject::Driver(&x)).unwrap();

    assert!(box_driver.contains(&x));
    let contained: Vec<String> = box_driver
        .contents()
        .unwrap()
        .iter()
        .map(|d| d.name().to_owned())
        .collect();
    assert_eq!(contained, vec!["x".to_owned()]);
    assert!(direct_parent_pools(&directory, "x").unwrap().is_empty());
    // a generic container does not count against exclusivity either
    let vault = ExclusivePool::create(&directory, "vault").unwrap();
    vault.insert(Subject::Driver(&x)).unwrap();
}
