use std::mem;

use ipcc_frame::command::{hss, sp, status};
use ipcc_transport::IpccOps;
use tracing::Level;

use crate::engine::Session;
use crate::error::{HostError, Result};
use crate::types::{SpStatus, STATUS_LEN};

impl<O: IpccOps> Session<'_, O> {
    /// Queries the SP status register.
    pub fn query_status(&mut self) -> Result<SpStatus> {
        let payload = self.execute(hss::STATUS, Some(sp::STATUS), &[], STATUS_LEN)?;
        SpStatus::decode(payload)
    }

    /// Acknowledges an SP restart.
    pub fn ackstart(&mut self) -> Result<()> {
        self.execute(hss::ACKSTART, Some(sp::ACK), &[], 0)?;
        Ok(())
    }

    /// Handles whatever made the SP raise its interrupt line.
    ///
    /// The nested transactions run with interrupt checking off, so an
    /// interrupt that stays asserted cannot recurse.
    pub(crate) fn service_interrupt(&mut self) -> Result<()> {
        let previous = mem::replace(&mut self.check_intr, false);
        let result = self.drain_status();
        self.check_intr = previous;
        result
    }

    fn drain_status(&mut self) -> Result<()> {
        loop {
            let current = self.query_status()?.status;
            if current == 0 {
                return Ok(());
            }

            let unknown = current & !status::KNOWN;
            if unknown != 0 {
                self.ops.log(
                    Level::ERROR,
                    format_args!("SP status {current:#x} has unknown bits {unknown:#x}"),
                );
                return Err(HostError::StatusDiverged(current));
            }

            if current & status::STARTED != 0 {
                self.ops
                    .log(Level::INFO, format_args!("SP restarted; acknowledging"));
                self.ackstart()?;
            }
            if current & status::ALERT != 0 {
                self.drain_alerts()?;
            }
        }
    }

    fn drain_alerts(&mut self) -> Result<()> {
        loop {
            let payload = self.transact(hss::ALERT, Some(sp::ALERT), &[], 0)?;
            let Some(&action) = self.res.msg[payload.clone()].first() else {
                return Err(HostError::MalformedReply {
                    command: "ALERT",
                    reason: "missing action",
                });
            };
            if action == 0 {
                return Ok(());
            }

            let message = String::from_utf8_lossy(&self.res.msg[payload.start + 1..payload.end]);
            self.ops.log(
                Level::WARN,
                format_args!("SP alert (action {action}): {message}"),
            );
        }
    }
}
