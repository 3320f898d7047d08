// Benchmark the constant-time decode and policy stages

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tcp_kernel::codec::{decode, encode};
use tcp_kernel::decision::Context;
use tcp_kernel::descriptor::{CapabilityFlags, DescriptorBuilder, RiskLevel};
use tcp_kernel::policy::{PolicySpec, PolicyTable};
use tcp_kernel::variant::Variant;

fn bench_decode(c: &mut Criterion) {
    let valid = encode(
        &DescriptorBuilder::new(Variant::V2Classical)
            .command("ls")
            .risk(RiskLevel::Safe)
            .build(),
    );
    let mut tampered = valid;
    tampered[10] ^= 0x08;

    c.bench_function("decode_valid", |b| b.iter(|| decode(black_box(&valid))));
    c.bench_function("decode_crc_mismatch", |b| {
        b.iter(|| decode(black_box(&tampered)))
    });
}

fn bench_policy(c: &mut Criterion) {
    let table = PolicyTable::compile(&PolicySpec::default()).expect("compile");
    let ctx = Context::default();
    let safe = DescriptorBuilder::new(Variant::V2Classical)
        .command("ls")
        .risk(RiskLevel::Safe)
        .build();
    let critical = DescriptorBuilder::new(Variant::V2Classical)
        .command("dd")
        .flags(CapabilityFlags::FILE_OPS | CapabilityFlags::DESTRUCTIVE)
        .risk(RiskLevel::Critical)
        .build();

    c.bench_function("policy_allow", |b| {
        b.iter(|| table.decide(black_box(&safe), black_box(&ctx)))
    });
    c.bench_function("policy_deny", |b| {
        b.iter(|| table.decide(black_box(&critical), black_box(&ctx)))
    });
}

criterion_group!(benches, bench_decode, bench_policy);
criterion_main!(benches);
