//! Final per-host status lines.

use std::io::{self, Write};

use crate::fleet::{FleetReport, Outcome};

/// Status text for one outcome: `ON`, `OFF`, or `ERROR: <message>`.
#[must_use]
pub fn status_text(outcome: &Outcome) -> String {
    match outcome {
        Ok(true) => "ON".to_string(),
        Ok(false) => "OFF".to_string(),
        Err(e) => format!("ERROR: {e}"),
    }
}

/// Write one `<hostname>: <status>` line per host, in request order.
///
/// # Errors
/// Returns any error from `out`.
pub fn write_report<W: Write>(report: &FleetReport, out: &mut W) -> io::Result<()> {
    for (hostname, outcome) in report.iter() {
        writeln!(out, "{hostname}: {}", status_text(outcome))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use super::*;
    use crate::error::{BmcError, PowerError};
    use crate::fleet::FleetExecutor;

    type Job = Pin<Box<dyn Future<Output = Outcome> + Send>>;

    fn job(outcome: Outcome) -> Job {
        Box::pin(async move { outcome })
    }

    #[tokio::test]
    async fn test_report_lines_follow_request_order() {
        let report = FleetExecutor::default()
            .execute(vec![
                ("node2".to_string(), job(Ok(true))),
                ("node1".to_string(), job(Ok(false))),
                (
                    "node3".to_string(),
                    job(Err(PowerError::Connect {
                        hostname: "node3".to_string(),
                        source: BmcError::Simulated("no route to host".to_string()),
                    })),
                ),
            ])
            .await;

        let mut out = Vec::new();
        write_report(&report, &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "node2: ON\nnode1: OFF\nnode3: ERROR: error connecting to host node3: no route to host\n"
        );
    }

    #[test]
    fn test_status_text() {
        assert_eq!(status_text(&Ok(true)), "ON");
        assert_eq!(status_text(&Ok(false)), "OFF");
        assert_eq!(
            status_text(&Err(PowerError::InvalidAction("reboot".into()))),
            "ERROR: invalid action: reboot"
        );
    }
}
