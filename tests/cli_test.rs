use assert_cmd::cargo_bin;
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::io::Write;
use std::process::Command;

#[test]
fn test_reconcile_end_to_end() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::new(cargo_bin!("walletrail"));
    cmd.arg("reconcile").arg("tests/fixtures/settlements.csv");

    // A fresh in-memory ledger knows none of the references.
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("reference,outcome"))
        .stdout(predicate::str::contains(
            "ngn_gateway_deposit_1700000000000_abcdefgh,unknown_reference",
        ))
        .stdout(predicate::str::contains(
            "xaf_gateway_payout_1700000000001_ijklmnop,unknown_reference",
        ))
        .stdout(predicate::str::contains("broken_row_without_status").not())
        .stderr(predicate::str::contains("Error reading event"));

    Ok(())
}

#[test]
fn test_reconcile_refuses_pending_rows() {
    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "reference,status,provider_ref").unwrap();
    writeln!(csv, "chain_deposit_1_abc,pending,").unwrap();

    let mut cmd = Command::new(cargo_bin!("walletrail"));
    cmd.arg("reconcile").arg(csv.path());

    cmd.assert()
        .success()
        .stdout(predicate::str::contains("chain_deposit_1_abc,rejected"))
        .stderr(predicate::str::contains("Error processing event chain_deposit_1_abc"));
}

#[test]
fn test_missing_input_file_fails() {
    let mut cmd = Command::new(cargo_bin!("walletrail"));
    cmd.arg("reconcile").arg("tests/fixtures/does_not_exist.csv");

    cmd.assert().failure();
}

#[test]
fn test_serve_rejects_bad_bind_address() {
    let mut cmd = Command::new(cargo_bin!("walletrail"));
    cmd.arg("serve").arg("--bind").arg("not-an-address");

    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}
