//! Put/get throughput on in-memory stores

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use patricia_db::{DataStores, Hash, MemoryStore, MerkleTrie};

/// Pseudo-random keys derived from a counter
fn keys(count: u32) -> Vec<Vec<u8>> {
    (0..count)
        .map(|i| Hash::digest(&i.to_le_bytes()).as_bytes()[..20].to_vec())
        .collect()
}

fn populated(keys: &[Vec<u8>]) -> MerkleTrie<MemoryStore> {
    let mut trie = MerkleTrie::with_stores(DataStores::in_memory());
    for key in keys {
        trie.put(key, key).unwrap();
    }
    trie
}

fn bench_put(c: &mut Criterion) {
    let keys = keys(1000);
    c.bench_function("put_1k", |b| {
        b.iter_batched(
            || MerkleTrie::with_stores(DataStores::in_memory()),
            |mut trie| {
                for key in &keys {
                    trie.put(key, key).unwrap();
                }
                trie
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_get(c: &mut Criterion) {
    let keys = keys(1000);
    let trie = populated(&keys);
    c.bench_function("get_1k", |b| {
        b.iter(|| {
            for key in &keys {
                criterion::black_box(trie.get(key).unwrap());
            }
        })
    });
}

fn bench_delete(c: &mut Criterion) {
    let keys = keys(1000);
    c.bench_function("delete_1k", |b| {
        b.iter_batched(
            || populated(&keys),
            |mut trie| {
                for key in &keys {
                    trie.delete(key).unwrap();
                }
                trie
            },
            BatchSize::SmallInput,
        )
    });
}

criterion_group!(benches, bench_put, bench_get, bench_delete);
criterion_main!(benches);
