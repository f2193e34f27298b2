use nmt_core::callstack::CallStack;
use nmt_core::config::TrackerConfig;
use test_log::test;

fn tracker() -> nmt_core::Tracker {
    TrackerConfig::new().build()
}

#[test]
fn scenario_1_adjacent_merge() {
    let t = tracker();
    let tag = t.make_tag("T").unwrap();

    t.reserve(0, 100, CallStack::empty(), tag);
    t.reserve(100, 100, CallStack::empty(), tag);

    let mut nodes = Vec::new();
    t.walk(|pos, _| {
        nodes.push(pos);
        true
    });
    assert_eq!(nodes, vec![0, 200]);
    assert_eq!(t.snapshot()[&tag].reserved, 200);
}

#[test]
fn scenario_2_reserve_then_full_release() {
    let t = tracker();
    let tag = t.make_tag("T").unwrap();

    t.reserve(0, 100, CallStack::empty(), tag);
    t.release(0, 100);

    let mut nodes = 0;
    t.walk(|_, _| {
        nodes += 1;
        true
    });
    assert_eq!(nodes, 0);
    assert!(t.snapshot().get(&tag).is_none_or(|c| c.reserved == 0));
}

#[test]
fn scenario_3_partial_commit_inherits_tag() {
    let t = tracker();
    let tag = t.make_tag("T").unwrap();

    t.reserve(0, 100, CallStack::empty(), tag);
    t.commit(0, 50, CallStack::empty());

    let mut nodes = Vec::new();
    t.walk(|pos, _| {
        nodes.push(pos);
        true
    });
    assert_eq!(nodes, vec![0, 50, 100]);

    let totals = t.snapshot()[&tag];
    assert_eq!(totals.reserved, 100);
    assert_eq!(totals.committed, 50);
}

#[test]
fn scenario_4_overlap_split_from_left() {
    let t = tracker();
    let tag = t.make_tag("T").unwrap();

    t.reserve(0, 100, CallStack::empty(), tag);
    t.commit(0, 40, CallStack::empty());
    t.uncommit(0, 40);

    let totals = t.snapshot()[&tag];
    assert_eq!(totals.reserved, 100);
    assert_eq!(totals.committed, 0);
}

#[test]
fn scenario_5_commit_uncommit_waves_end_empty() {
    const N: u64 = 8;
    const REGION: u64 = 4096;

    let t = tracker();
    let tag = t.make_tag("T").unwrap();

    t.reserve(0, N * REGION, CallStack::empty(), tag);
    for i in 0..N {
        t.commit(i * REGION, REGION, CallStack::empty());
    }
    for i in 0..N {
        t.uncommit(i * REGION, REGION);
    }
    t.release(0, N * REGION);

    let mut nodes = 0;
    t.walk(|_, _| {
        nodes += 1;
        true
    });
    assert_eq!(nodes, 0);

    let totals = t.snapshot().get(&tag).copied().unwrap_or_default();
    assert_eq!(totals.reserved, 0);
    assert_eq!(totals.committed, 0);
}

#[test]
fn scenario_6_tag_rewrite() {
    let t = tracker();
    let t1 = t.make_tag("T1").unwrap();
    let t2 = t.make_tag("T2").unwrap();

    t.reserve(0, 300, CallStack::empty(), t1);
    t.set_tag(100, 100, t2);

    let mut nodes = Vec::new();
    t.walk(|pos, _| {
        nodes.push(pos);
        true
    });
    assert_eq!(nodes, vec![0, 100, 200, 300]);

    let mut middle_tag = None;
    t.walk(|pos, change| {
        if pos == 100 {
            middle_tag = Some(change.out_state.meta.tag);
        }
        true
    });
    assert_eq!(middle_tag, Some(t2));
}
