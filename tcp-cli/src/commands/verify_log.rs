// tcp-cli: verify-log
// Recomputes every chain link from genesis; exit 1 on any mismatch.

use crate::error::CliError;
use std::path::Path;
use tcp_lockchain::storage::AuditLog;

pub fn run(path: &Path) -> Result<(), CliError> {
    if !path.exists() {
        return Err(CliError::Config(format!(
            "audit log path does not exist: {}",
            path.display()
        )));
    }

    let log = AuditLog::open(path)?;
    let records = log.verify_chain()?;
    match log.last_acked()? {
        Some(acked) => println!("chain intact: {records} records, last acknowledged seq {acked}"),
        None => println!("chain intact: {records} records"),
    }
    Ok(())
}
