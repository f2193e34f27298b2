use criterion::{criterion_group, criterion_main, Criterion};
use nmt_core::region::{RegionData, StateType, Tag};
use nmt_core::vmatree::VMATree;
use rand::Rng;

const REGION: u64 = 4096;

fn vmatree_sequential_reserve(c: &mut Criterion) {
    c.bench_function("vmatree sequential reserve", |b| {
        b.iter(|| {
            let mut tree = VMATree::new(1, None);
            let meta = RegionData::new(nmt_core::callstack::StackIndex::EMPTY, Tag::from_raw(1));
            for i in 0..10_000u64 {
                tree.register_mapping(i * REGION, (i + 1) * REGION, StateType::Reserved, meta, false);
            }
        });
    });
}

fn vmatree_commit_uncommit_wave(c: &mut Criterion) {
    let mut tree = VMATree::new(1, None);
    let tag = Tag::from_raw(1);
    let reserve_meta = RegionData::new(nmt_core::callstack::StackIndex::EMPTY, tag);
    tree.register_mapping(0, 10_000 * REGION, StateType::Reserved, reserve_meta, false);

    c.bench_function("vmatree commit/uncommit 4KiB region", |b| {
        b.iter(|| {
            let commit_meta = RegionData::new(nmt_core::callstack::StackIndex::EMPTY, Tag::NONE);
            tree.register_mapping(0, REGION, StateType::Committed, commit_meta, true);
            tree.register_mapping(0, REGION, StateType::Reserved, commit_meta, true);
        });
    });
}

fn vmatree_state_at_lookup(c: &mut Criterion) {
    const REGION_COUNT: u64 = 10_000;
    let mut tree = VMATree::new(1, None);
    let tag = Tag::from_raw(1);
    let meta = RegionData::new(nmt_core::callstack::StackIndex::EMPTY, tag);
    for i in 0..REGION_COUNT {
        tree.register_mapping(i * REGION, (i + 1) * REGION, StateType::Reserved, meta, false);
    }

    let mut rng = rand::rng();

    c.bench_function("vmatree state_at random lookup in 10k-region tree", |b| {
        b.iter(|| {
            let pos = rng.random_range(0..REGION_COUNT) * REGION;
            std::hint::black_box(tree.state_at(pos));
        });
    });
}

criterion_group!(
    benches,
    vmatree_sequential_reserve,
    vmatree_commit_uncommit_wave,
    vmatree_state_at_lookup
);
criterion_main!(benches);
