//! `ipmitool` backend.
//!
//! Each call runs `ipmitool -I lanplus` against the controller; a session
//! is the validated set of connection arguments.

use async_trait::async_trait;
use tracing::debug;

use super::{ManagementClient, PowerCommand, PowerSession};
use crate::error::BmcError;
use crate::host::HostDescriptor;

/// Default binary name.
const DEFAULT_IPMITOOL: &str = "ipmitool";

/// `ipmitool` management client.
#[derive(Debug, Clone)]
pub struct IpmiTool {
    /// Binary to execute.
    program: String,
}

impl Default for IpmiTool {
    fn default() -> Self {
        Self::new(DEFAULT_IPMITOOL)
    }
}

impl IpmiTool {
    /// Use `program` as the `ipmitool` binary.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ManagementClient for IpmiTool {
    async fn open(
        &self,
        host: &HostDescriptor,
        debug: bool,
    ) -> Result<Box<dyn PowerSession>, BmcError> {
        let session = IpmiToolSession {
            program: self.program.clone(),
            host: host.clone(),
            debug,
        };

        // Proves the controller is reachable and accepts the credentials.
        session.run("chassis status").await?;
        Ok(Box::new(session))
    }
}

/// Connection arguments for one controller.
struct IpmiToolSession {
    program: String,
    host: HostDescriptor,
    debug: bool,
}

impl IpmiToolSession {
    /// Execute an IPMI command and return its stdout.
    async fn run(&self, command: &str) -> Result<String, BmcError> {
        let port_str = self.host.port.to_string();

        let mut args = vec![
            "-I",
            "lanplus",
            "-H",
            &self.host.ip,
            "-p",
            &port_str,
            "-U",
            &self.host.username,
            "-P",
            &self.host.password,
        ];
        if self.debug {
            args.push("-v");
        }
        args.extend(command.split_whitespace());

        debug!(
            hostname = %self.host.hostname,
            bmc_address = %self.host.ip,
            command = %command,
            "Executing IPMI command"
        );

        let output = tokio::process::Command::new(&self.program)
            .args(&args)
            .output()
            .await
            .map_err(|source| BmcError::Spawn {
                tool: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(BmcError::Command {
                command: command.to_string(),
                message: stderr.trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl PowerSession for IpmiToolSession {
    async fn chassis_power(&self) -> Result<bool, BmcError> {
        let command = "chassis power status";
        let output = self.run(command).await?;
        parse_power_status(&output).ok_or_else(|| BmcError::UnexpectedResponse {
            command: command.to_string(),
            output: output.trim().to_string(),
        })
    }

    async fn set_chassis_power(&self, command: PowerCommand) -> Result<(), BmcError> {
        let command = match command {
            PowerCommand::Up => "chassis power on",
            PowerCommand::Down => "chassis power off",
        };
        self.run(command).await?;
        Ok(())
    }
}

/// Parse `Chassis Power is on|off`.
fn parse_power_status(output: &str) -> Option<bool> {
    output.lines().find_map(|line| {
        let state = line.trim().strip_prefix("Chassis Power is ")?;
        match state.trim() {
            "on" => Some(true),
            "off" => Some(false),
            _ => None,
        }
    })
}
