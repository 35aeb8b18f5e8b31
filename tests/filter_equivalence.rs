//! The in-memory and pushdown evaluators share one predicate language and
//! must agree on every input; this generates attribute sets and filters and
//! checks that they do.

use chrono::NaiveDate;
use proptest::prelude::*;

use stowage::construct::{Directory, PersistenceMode};
use stowage::datatype::Value;
use stowage::driver::{Driver, GenericDriver, Numbering, get_by_attr};
use stowage::filter::{AttrFilter, NumberMatch};

#[derive(Debug, Clone)]
struct AttrSpec {
    key: &'static str,
    number: Option<i64>,
    subkey: Option<&'static str>,
    value: Value,
}

fn value_strategy() -> impl Strategy<Value = Value> {
    let moment = NaiveDate::from_ymd_opt(2024, 3, 1)
        .unwrap()
        .and_hms_opt(12, 30, 0)
        .unwrap();
    prop_oneof![
        Just(Value::Text("a".into())),
        Just(Value::Text("b".into())),
        Just(Value::Int(1)),
        Just(Value::Int(2)),
        Just(Value::Real(1.5)),
        Just(Value::Moment(moment)),
        Just(Value::relation("other")),
    ]
}

fn attr_strategy() -> impl Strategy<Value = AttrSpec> {
    (
        prop::sample::select(vec!["color", "c0lor", "disk", "size", "_contains", "_note"]),
        prop::option::of(0i64..3),
        prop::option::of(prop::sample::select(vec!["s1", "s2"])),
        value_strategy(),
    )
        .prop_map(|(key, number, subkey, value)| AttrSpec {
            key,
            number,
            subkey,
            value,
        })
}

fn filter_strategy() -> impl Strategy<Value = AttrFilter> {
    let key = prop_oneof![
        Just(None),
        prop::sample::select(vec!["color", "disk", "_contains", "missing"])
            .prop_map(|k| Some((k, false))),
        prop::sample::select(vec!["c*", "*", "d?sk", "_*", "c[*"]).prop_map(|p| Some((p, true))),
    ];
    let subkey = prop_oneof![
        Just(None),
        prop::sample::select(vec!["s1", "s3"]).prop_map(|s| Some((s, false))),
        prop::sample::select(vec!["s*", "x*"]).prop_map(|p| Some((p, true))),
    ];
    let value = prop::option::of(value_strategy());
    let number = prop_oneof![
        Just(NumberMatch::Any),
        Just(NumberMatch::Numbered),
        Just(NumberMatch::Unnumbered),
        (0i64..3).prop_map(NumberMatch::Exactly),
    ];
    (key, subkey, value, number, any::<bool>(), any::<bool>()).prop_map(
        |(key, subkey, value, number, show_hidden, unsorted)| {
            let mut filter = AttrFilter::new().number(number);
            filter = match key {
                Some((k, false)) => filter.key(k),
                Some((p, true)) => filter.key_like(p),
                None => filter,
            };
            filter = match subkey {
                Some((s, false)) => filter.subkey(s),
                Some((p, true)) => filter.subkey_like(p),
                None => filter,
            };
            if let Some(value) = value {
                filter = filter.value(value);
            }
            if show_hidden {
                filter = filter.show_hidden();
            }
            if unsorted {
                filter = filter.unsorted();
            }
            filter
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]
    #[test]
    fn both_evaluators_agree(
        attrs in prop::collection::vec(attr_strategy(), 0..8),
        filter in filter_strategy(),
    ) {
        let directory = Directory::new(PersistenceMode::InMemory).unwrap();
        let subject = GenericDriver::create(&directory, "subject").unwrap();
        GenericDriver::create(&directory, "other").unwrap();
        for spec in &attrs {
            let numbering = match spec.number {
                Some(n) => Numbering::At(n),
                None => Numbering::None,
            };
            subject
                .add_attr(spec.key, spec.value.clone(), numbering, spec.subkey)
                .unwrap();
        }
        let in_memory: Vec<u64> = filter
            .apply(&directory.attributes_of("subject"))
            .iter()
            .map(|a| a.id())
            .collect();
        let pushed_down: Vec<u64> = directory
            .attr_search(&filter, Some("subject"))
            .unwrap()
            .iter()
            .map(|r| r.attr().id())
            .collect();
        prop_assert_eq!(in_memory, pushed_down);
    }
}

#[test]
fn get_by_attr_wraps_matching_owners() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let web1 = GenericDriver::create(&directory, "web1").unwrap();
    let web2 = GenericDriver::create(&directory, "web2").unwrap();
    let db1 = GenericDriver::create(&directory, "db1").unwrap();
    web1.add_attr("role", "web".into(), Numbering::None, None).unwrap();
    web2.add_attr("role", "web".into(), Numbering::None, None).unwrap();
    db1.add_attr("role", "db".into(), Numbering::None, None).unwrap();

    let found = get_by_attr(&directory, &AttrFilter::new().key("role").value("web")).unwrap();
    let names: Vec<&str> = found.iter().map(|d| d.name()).collect();
    assert_eq!(names, vec!["web1", "web2"]);
}

#[test]
fn get_by_attr_finds_relation_values() {
    let directory = Directory::new(PersistenceMode::InMemory).unwrap();
    let rack = GenericDriver::create(&directory, "rack1").unwrap();
    let host = GenericDriver::create(&directory, "host1").unwrap();
    let _ = rack;
    host.add_attr("located_in", Value::relation("rack1"), Numbering::None, None)
        .unwrap();

    let found =
        get_by_attr(&directory, &AttrFilter::new().value(Value::relation("rack1"))).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name(), "host1");
}
