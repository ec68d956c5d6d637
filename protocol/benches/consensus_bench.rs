// Consensus and settlement benchmarks.
//
// Covers vote acknowledgement signing and verification for both signer
// kinds, batch validation against a funded ledger, and a full certified
// round across an in-process cluster.

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use settlenet_protocol::config::ConsensusConfig;
use settlenet_protocol::consensus::{
    vote_payload, ConsensusEngine, Ed25519Signer, MockSigner, Signer, ValidatorSet,
};
use settlenet_protocol::institution::TransactionPool;
use settlenet_protocol::ledger::{Block, Ledger, SharedLedger};
use settlenet_protocol::network::{SimulatedNetwork, SimulationOptions};
use settlenet_protocol::transaction::{Transaction, TransactionBuilder};

fn validator_ids(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("V{i:02}")).collect()
}

fn funded_ledger(accounts: usize) -> SharedLedger {
    let ledger = Ledger::shared();
    {
        let mut guard = ledger.write();
        for i in 0..accounts {
            let mint = TransactionBuilder::mint(&format!("ACC{i}"), 1_000_000)
                .timestamp(0)
                .build();
            guard.issue(mint).unwrap();
        }
    }
    ledger
}

fn transfers(accounts: usize, count: usize) -> Vec<Transaction> {
    (0..count)
        .map(|i| {
            TransactionBuilder::transfer(
                &format!("ACC{}", i % accounts),
                &format!("ACC{}", (i + 1) % accounts),
                100,
            )
            .timestamp(i as u64 + 1)
            .build()
        })
        .collect()
}

/// Builds `n` replicas sharing one simulated network, one ledger per replica.
fn setup_cluster(n: usize) -> (Arc<SimulatedNetwork>, Vec<Arc<ConsensusEngine>>) {
    let ids = validator_ids(n);
    let network = Arc::new(SimulatedNetwork::new(
        ids.iter().map(String::as_str),
        SimulationOptions::default(),
    ));
    let engines = ids
        .iter()
        .map(|id| {
            Arc::new(ConsensusEngine::new(
                id.clone(),
                ValidatorSet::from_ids(ids.iter().cloned()),
                funded_ledger(8),
                network.clone(),
                Arc::new(TransactionPool::default()),
                Arc::new(MockSigner::new(id.clone())),
                ConsensusConfig::default(),
            ))
        })
        .collect();
    (network, engines)
}

fn bench_ack_mock(c: &mut Criterion) {
    let signer = MockSigner::new("V00");
    let payload = vote_payload(7, &Block::genesis().hash);
    let ack = signer.sign(&payload);

    c.bench_function("consensus/ack_sign_mock", |b| {
        b.iter(|| signer.sign(&payload));
    });
    c.bench_function("consensus/ack_verify_mock", |b| {
        b.iter(|| signer.verify(&ack, &payload, "V00"));
    });
}

fn bench_ack_ed25519(c: &mut Criterion) {
    let signers = Ed25519Signer::generate_cluster(["V00", "V01"]);
    let payload = vote_payload(7, &Block::genesis().hash);
    let ack = signers[0].sign(&payload);

    c.bench_function("consensus/ack_sign_ed25519", |b| {
        b.iter(|| signers[0].sign(&payload));
    });
    c.bench_function("consensus/ack_verify_ed25519", |b| {
        b.iter(|| signers[1].verify(&ack, &payload, "V00"));
    });
}

fn bench_validate_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("ledger/validate_batch");
    let ledger = funded_ledger(64);

    for size in [10usize, 100, 1_000] {
        let batch = transfers(64, size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &batch, |b, batch| {
            let guard = ledger.read();
            b.iter(|| Ledger::validate_batch(guard.balances(), batch).unwrap());
        });
    }

    group.finish();
}

fn bench_certified_round(c: &mut Criterion) {
    let mut group = c.benchmark_group("consensus/certified_round");

    for validator_count in [4usize, 7, 10] {
        group.throughput(Throughput::Elements(validator_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(validator_count),
            &validator_count,
            |b, &n| {
                b.iter_with_setup(
                    || setup_cluster(n),
                    |(network, engines)| {
                        for engine in &engines {
                            engine.propose_if_leader();
                        }
                        network.pump(&engines).unwrap()
                    },
                );
            },
        );
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ack_mock,
    bench_ack_ed25519,
    bench_validate_batch,
    bench_certified_round,
);
criterion_main!(benches);
