// reconcile.rs — Re-apply driver credits that failed after completion.

use super::Session;

pub fn execute(session: &Session) -> anyhow::Result<()> {
    let report = session.engine.reconcile_driver_credits()?;
    println!("Completed rides scanned: {}", report.scanned);
    println!("Credits applied:         {}", report.credited);
    if report.failed > 0 {
        anyhow::bail!(
            "{} credit(s) still failing; see the log for details",
            report.failed
        );
    }
    Ok(())
}
