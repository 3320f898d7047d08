// tcp-cli: status
// Prints the keystore epoch, the variants this deployment accepts, and a
// locally sampled timing_ok verdict.

use crate::error::CliError;
use serde::Serialize;
use std::path::Path;
use tcp_config::TcpConfig;
use tcp_crypto::keystore::KeystoreFile;
use tcp_kernel::codec::{decode_with_mode, encode};
use tcp_kernel::decision::Context;
use tcp_kernel::descriptor::{CapabilityFlags, DescriptorBuilder, RiskLevel};
use tcp_kernel::guard::Stage;
use tcp_kernel::policy::PolicyTable;
use tcp_kernel::timer::StageTimer;
use tcp_kernel::variant::Variant;
use tcp_telemetry::Telemetry;

/// Samples taken for the local timing self-check.
const SELF_CHECK_SAMPLES: u64 = 5_000;

#[derive(Serialize)]
struct StatusReport {
    epoch: u64,
    previous_epoch: Option<u64>,
    supported_variants: Vec<String>,
    validators: usize,
    timing_ok: bool,
    decode_cv: Option<f64>,
    policy_cv: Option<f64>,
}

pub fn run(config: &TcpConfig, json: bool) -> Result<(), CliError> {
    let keystore = KeystoreFile::load(Path::new(&config.keystore.path))?;
    let snapshot = keystore.to_snapshot()?;

    let supported = if config.integrity.pq_required {
        vec![Variant::V3PostQuantum]
    } else {
        vec![Variant::V2Classical, Variant::V3PostQuantum]
    };

    let telemetry = self_check(config)?;

    let report = StatusReport {
        epoch: snapshot.epoch(),
        previous_epoch: snapshot.previous_epoch(),
        supported_variants: supported.iter().map(|v| v.to_string()).collect(),
        validators: snapshot.validator_count(),
        timing_ok: telemetry.timing_ok(),
        decode_cv: telemetry.cv(Stage::Decode),
        policy_cv: telemetry.cv(Stage::Policy),
    };

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::Runtime(e.to_string()))?
        );
    } else {
        println!("epoch:              {}", report.epoch);
        if let Some(previous) = report.previous_epoch {
            println!("overlap epoch:      {previous}");
        }
        println!(
            "supported variants: {}",
            report.supported_variants.join(", ")
        );
        println!("validators:         {}", report.validators);
        println!("timing_ok:          {}", report.timing_ok);
        if let (Some(decode), Some(policy)) = (report.decode_cv, report.policy_cv) {
            println!("decode cv:          {decode:.4}");
            println!("policy cv:          {policy:.4}");
        }
    }
    Ok(())
}

/// Run the constant-time stages against a fixed descriptor and measure
/// dispersion locally. A quarantine-worthy host shows up here without
/// needing a live cluster.
fn self_check(config: &TcpConfig) -> Result<Telemetry, CliError> {
    let telemetry = Telemetry::new(config.telemetry.cv_threshold, SELF_CHECK_SAMPLES / 2);
    let table = PolicyTable::compile(&config.policy.to_policy_spec()?)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let decode_mode = config.codec.to_decode_mode()?;

    let descriptor = DescriptorBuilder::new(Variant::V2Classical)
        .command("ls")
        .flags(CapabilityFlags::FILE_OPS)
        .risk(RiskLevel::Safe)
        .build();
    let bytes = encode(&descriptor);
    let context = Context::default();

    for _ in 0..SELF_CHECK_SAMPLES {
        let timer = StageTimer::start();
        let decoded = decode_with_mode(&bytes, decode_mode);
        telemetry.record_stage(Stage::Decode, timer.elapsed_ticks());

        if let Ok(d) = decoded {
            let timer = StageTimer::start();
            let _ = table.decide(&d, &context);
            telemetry.record_stage(Stage::Policy, timer.elapsed_ticks());
        }
    }
    Ok(telemetry)
}
