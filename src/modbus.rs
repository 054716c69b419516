//! Modbus TCP client for inverter communication
//!
//! This module provides async Modbus TCP communication with the SUN2000
//! inverter. The `RegisterTransport` trait is the seam the measurement client
//! talks through, so decoding and the control loop can be exercised without a
//! device on the network.

use crate::config::InverterConfig;
use crate::error::{HeliosError, Result};
use crate::logging::get_logger;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::lookup_host;
use tokio::time::timeout;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

/// Register-level transport capability
#[async_trait::async_trait]
pub trait RegisterTransport: Send {
    /// Open the connection
    async fn connect(&mut self) -> Result<()>;

    /// Whether the connection is currently open. Must not block.
    fn is_connected(&self) -> bool;

    /// Release the connection. Safe to call when already closed.
    async fn disconnect(&mut self);

    /// Read `count` contiguous holding registers starting at `address`
    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>>;
}

/// Modbus TCP client for SUN2000 communication
pub struct ModbusClient {
    /// Modbus TCP client connection
    client: Option<tokio_modbus::client::Context>,

    /// Configuration
    config: InverterConfig,

    /// Connect and per-request timeout
    request_timeout: Duration,

    /// Attempts per read
    max_attempts: u32,

    /// Logger
    logger: crate::logging::StructuredLogger,
}

impl ModbusClient {
    /// Create a new Modbus client
    pub fn new(config: &InverterConfig) -> Self {
        let logger = get_logger("modbus");
        Self {
            client: None,
            config: config.clone(),
            request_timeout: config.request_timeout(),
            max_attempts: config.max_request_retries.max(1),
            logger,
        }
    }

    /// Get client reference or error if not connected
    fn get_client(&mut self) -> Result<&mut tokio_modbus::client::Context> {
        self.client
            .as_mut()
            .ok_or_else(|| HeliosError::communication("Not connected to Modbus server"))
    }

    /// Resolve the configured host (IP literal or name) to its socket addresses
    async fn resolve(&mut self) -> Result<Vec<SocketAddr>> {
        let host = self.config.ip.trim();
        let lookup = lookup_host((host, self.config.port));
        let addrs: Vec<SocketAddr> = match timeout(self.request_timeout, lookup).await {
            Ok(Ok(addrs)) => addrs.collect(),
            Ok(Err(e)) => {
                return Err(HeliosError::communication(format!(
                    "Failed to resolve {}: {}",
                    host, e
                )));
            }
            Err(_) => {
                return Err(HeliosError::timeout(format!(
                    "Resolving {} timed out",
                    host
                )));
            }
        };
        if addrs.is_empty() {
            return Err(HeliosError::communication(format!(
                "No address found for {}",
                host
            )));
        }
        Ok(addrs)
    }

    async fn connect_addr(&mut self, addr: SocketAddr) -> Result<tokio_modbus::client::Context> {
        let slave = Slave(self.config.slave_id);
        match timeout(self.request_timeout, tcp::connect_slave(addr, slave)).await {
            Ok(Ok(client)) => Ok(client),
            Ok(Err(e)) => Err(HeliosError::communication(format!(
                "Failed to connect to Modbus server at {}: {}",
                addr, e
            ))),
            Err(_) => Err(HeliosError::timeout(format!(
                "Connection timeout at {}",
                addr
            ))),
        }
    }

    async fn read_once(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        let timeout_duration = self.request_timeout;
        let client = self.get_client()?;
        let request = client.read_holding_registers(address, count);

        match timeout(timeout_duration, request).await {
            Ok(Ok(Ok(words))) => Ok(words),
            Ok(Ok(Err(exception))) => Err(HeliosError::communication(format!(
                "Device answered with exception {:?}",
                exception
            ))),
            Ok(Err(e)) => {
                // The socket is gone; the next cycle has to reconnect
                self.client = None;
                Err(HeliosError::communication(format!(
                    "Failed to read holding registers: {}",
                    e
                )))
            }
            Err(_) => Err(HeliosError::timeout(format!(
                "No response for {} registers at {} within {:?}",
                count, address, timeout_duration
            ))),
        }
    }
}

#[async_trait::async_trait]
impl RegisterTransport for ModbusClient {
    async fn connect(&mut self) -> Result<()> {
        let address = format!("{}:{}", self.config.ip, self.config.port);

        self.logger
            .info(&format!("Connecting to Modbus server at {}", address));

        let addrs = match self.resolve().await {
            Ok(addrs) => addrs,
            Err(e) => {
                self.logger.error(&e.to_string());
                return Err(e);
            }
        };

        // A name may resolve to several addresses (IPv6 and IPv4); take the first that answers
        let mut last_error = None;
        for addr in addrs {
            match self.connect_addr(addr).await {
                Ok(client) => {
                    self.client = Some(client);
                    self.logger
                        .info(&format!("Successfully connected to Modbus server at {}", addr));
                    return Ok(());
                }
                Err(e) => {
                    self.logger.warn(&e.to_string());
                    last_error = Some(e);
                }
            }
        }

        let error =
            last_error.unwrap_or_else(|| HeliosError::communication("No address to connect to"));
        self.logger.error(&error.to_string());
        Err(error)
    }

    fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    async fn disconnect(&mut self) {
        if self.client.take().is_some() {
            // Dropping the context closes the socket
            self.logger.info("Disconnecting from Modbus server");
        }
    }

    async fn read_holding_registers(&mut self, address: u16, count: u16) -> Result<Vec<u16>> {
        self.logger.debug(&format!(
            "Reading {} registers from address {} on slave {}",
            count, address, self.config.slave_id
        ));

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.read_once(address, count).await {
                Ok(words) => {
                    self.logger
                        .trace(&format!("Read {} registers: {:?}", words.len(), words));
                    if words.len() != usize::from(count) {
                        return Err(HeliosError::decode(format!(
                            "Expected {} registers, got {}",
                            count,
                            words.len()
                        )));
                    }
                    return Ok(words);
                }
                Err(e @ HeliosError::Timeout { .. }) if attempt < self.max_attempts => {
                    self.logger.warn(&format!(
                        "Read attempt {}/{} failed: {}",
                        attempt, self.max_attempts, e
                    ));
                }
                Err(e) => {
                    if matches!(e, HeliosError::Timeout { .. }) {
                        // Repeated silence usually means a half-open socket
                        self.client = None;
                    }
                    self.logger.error(&e.to_string());
                    return Err(e);
                }
            }
        }
    }
}
