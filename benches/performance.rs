//! Performance benchmarks for Meridian core paths.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::BTreeMap;
use std::sync::Arc;

use meridian_core::crypto::PrivateKey;
use meridian_core::storage::{Database, MemDatabase, MerkleTrie};
use meridian_core::types::address_set::AddressSet;
use meridian_core::types::lightning::AggregatedVote;
use meridian_core::types::vote::{CommitCertificate, Vote, VoteSet};
use meridian_core::types::{keccak256, Hash};

/// Benchmark hashing and signing primitives.
fn bench_crypto(c: &mut Criterion) {
    let mut group = c.benchmark_group("crypto");

    let data = vec![0u8; 1024];
    group.bench_function("keccak256_1kb", |b| b.iter(|| keccak256(black_box(&data))));

    let key = PrivateKey::generate();
    let message = vec![0u8; 256];
    group.bench_function("sign_256b", |b| b.iter(|| key.sign(black_box(&message))));

    let sig = key.sign(&message);
    let addr = key.address();
    group.bench_function("verify_256b", |b| {
        b.iter(|| sig.verify(black_box(&message), black_box(&addr)))
    });

    group.finish();
}

/// Benchmark vote-set operations at committee scale.
fn bench_votes(c: &mut Criterion) {
    let mut group = c.benchmark_group("votes");

    let keys: Vec<PrivateKey> = (0..31).map(|_| PrivateKey::generate()).collect();
    let validators = AddressSet::from_addresses(keys.iter().map(|k| k.address()));
    let block = Hash([0x12; 32]);

    let mut votes = VoteSet::new();
    for (i, key) in keys.iter().enumerate() {
        let mut vote = Vote::new(block, 100, i as u64 % 3 + 1, key.address());
        vote.sign(key);
        votes.add_vote(vote);
    }

    group.bench_function("unique_voter_31", |b| {
        b.iter(|| black_box(&votes).unique_voter())
    });

    let cc = CommitCertificate::new(block, votes.unique_voter());
    group.bench_function("certificate_validate_31", |b| {
        b.iter(|| black_box(&cc).is_valid(black_box(&validators)))
    });

    group.finish();
}

/// Benchmark lightning aggregate merging.
fn bench_aggregates(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregates");

    let keys: Vec<PrivateKey> = (0..16).map(|_| PrivateKey::generate()).collect();
    let lightnings = AddressSet::from_addresses(keys.iter().map(|k| k.address()));
    let block = Hash([0x12; 32]);

    let mut left = AggregatedVote::new(block, &lightnings);
    let mut right = AggregatedVote::new(block, &lightnings);
    for (i, key) in keys.iter().enumerate() {
        if i % 2 == 0 {
            left.sign(key);
        } else {
            right.sign(key);
        }
    }

    group.bench_function("merge_8_8", |b| {
        b.iter(|| black_box(&left).merge(black_box(&right)))
    });

    let full = left.merge(&right).unwrap().unwrap();
    group.bench_function("validate_16", |b| {
        b.iter(|| black_box(&full).validate(black_box(&lightnings)))
    });

    group.finish();
}

/// Benchmark trie commits over growing state.
fn bench_trie(c: &mut Criterion) {
    let mut group = c.benchmark_group("trie");

    for size in [64usize, 512] {
        let mut content = BTreeMap::new();
        for i in 0..size {
            content.insert(
                format!("ls/a/{i:08}").into_bytes(),
                vec![0xAB; 64],
            );
        }

        group.bench_function(format!("commit_{size}"), |b| {
            let db: Arc<dyn Database> = Arc::new(MemDatabase::new());
            let trie = MerkleTrie::new(db);
            b.iter(|| trie.commit(black_box(&content)))
        });

        group.bench_function(format!("root_of_{size}"), |b| {
            b.iter(|| MerkleTrie::root_of(black_box(&content)))
        });
    }

    group.finish();
}

criterion_group!(benches, bench_crypto, bench_votes, bench_aggregates, bench_trie);
criterion_main!(benches);
