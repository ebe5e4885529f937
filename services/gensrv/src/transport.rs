//! Register-table transport
//!
//! [`RegisterTransport`] is what the poll loop and the command dispatcher
//! need from the device link. [`ModbusTransport`] implements it over Modbus
//! RTU on a serial port or Modbus TCP.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{rtu, tcp, Context, Reader, Writer};
use tokio_modbus::Slave;
use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info, warn};

use crate::config::{LinkMode, ParityConfig, TransportConfig};
use crate::error::{GenSrvError, Result};

/// Most registers one Modbus read request may return
pub const MAX_READ_REGISTERS: u16 = 125;

#[async_trait]
pub trait RegisterTransport: Send + Sync {
    /// Read `count` holding registers starting at `start`
    async fn read_block(&self, start: u16, count: u16) -> Result<Vec<u16>>;

    async fn write_single_coil(&self, coil: u16, value: bool) -> Result<()>;
}

/// Modbus client with lazy connect and reconnect after link errors
///
/// One request is in flight at a time; the poll loop and the dispatcher
/// share the link through the context mutex.
pub struct ModbusTransport {
    config: TransportConfig,
    ctx: Mutex<Option<Context>>,
}

impl ModbusTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            ctx: Mutex::new(None),
        }
    }

    fn request_timeout(&self) -> Duration {
        self.config.timeout()
    }

    async fn connect(&self) -> Result<Context> {
        let slave = Slave(self.config.slave_id);
        let ctx = match self.config.mode {
            LinkMode::Rtu => {
                let builder = tokio_serial::new(&self.config.device, self.config.baud_rate)
                    .data_bits(map_data_bits(self.config.data_bits))
                    .parity(map_parity(self.config.parity))
                    .stop_bits(map_stop_bits(self.config.stop_bits))
                    .timeout(self.request_timeout());
                let port = SerialStream::open(&builder)?;
                rtu::attach_slave(port, slave)
            },
            LinkMode::Tcp => {
                let addr = tokio::net::lookup_host((self.config.host.as_str(), self.config.port))
                    .await?
                    .next()
                    .ok_or_else(|| {
                        GenSrvError::connection(format!(
                            "cannot resolve {}:{}",
                            self.config.host, self.config.port
                        ))
                    })?;
                timeout(self.request_timeout(), tcp::connect_slave(addr, slave)).await??
            },
        };
        info!("Connected to {}", self.config.endpoint());
        Ok(ctx)
    }
}

#[async_trait]
impl RegisterTransport for ModbusTransport {
    async fn read_block(&self, start: u16, count: u16) -> Result<Vec<u16>> {
        let mut guard = self.ctx.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let ctx = guard
            .as_mut()
            .ok_or_else(|| GenSrvError::internal("modbus context missing after connect"))?;

        let mut words = Vec::with_capacity(usize::from(count));
        let mut address = start;
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(MAX_READ_REGISTERS);
            let result = timeout(
                self.request_timeout(),
                ctx.read_holding_registers(address, chunk),
            )
            .await;
            match result {
                Ok(Ok(Ok(mut values))) => {
                    if values.len() != usize::from(chunk) {
                        return Err(GenSrvError::protocol(format!(
                            "expected {} registers at {}, got {}",
                            chunk,
                            address,
                            values.len()
                        )));
                    }
                    words.append(&mut values);
                },
                Ok(Ok(Err(exception))) => {
                    return Err(GenSrvError::protocol(format!(
                        "exception reading {} registers at {}: {:?}",
                        chunk, address, exception
                    )));
                },
                Ok(Err(e)) => {
                    warn!("Dropping connection to {}: {}", self.config.endpoint(), e);
                    *guard = None;
                    return Err(e.into());
                },
                Err(_) => {
                    warn!("No reply from {}, dropping connection", self.config.endpoint());
                    *guard = None;
                    return Err(GenSrvError::timeout(format!(
                        "read {} registers at {}",
                        chunk, address
                    )));
                },
            }
            address = address.wrapping_add(chunk);
            remaining -= chunk;
        }
        debug!("Read {} registers at {}", words.len(), start);
        Ok(words)
    }

    async fn write_single_coil(&self, coil: u16, value: bool) -> Result<()> {
        let mut guard = self.ctx.lock().await;
        if guard.is_none() {
            *guard = Some(self.connect().await?);
        }
        let ctx = guard
            .as_mut()
            .ok_or_else(|| GenSrvError::internal("modbus context missing after connect"))?;

        let result = timeout(self.request_timeout(), ctx.write_single_coil(coil, value)).await;
        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(exception))) => Err(GenSrvError::protocol(format!(
                "exception writing coil {}: {:?}",
                coil, exception
            ))),
            Ok(Err(e)) => {
                *guard = None;
                Err(e.into())
            },
            Err(_) => {
                *guard = None;
                Err(GenSrvError::timeout(format!("write coil {}", coil)))
            },
        }
    }
}

fn map_data_bits(bits: u8) -> DataBits {
    match bits {
        5 => DataBits::Five,
        6 => DataBits::Six,
        7 => DataBits::Seven,
        _ => DataBits::Eight,
    }
}

fn map_parity(parity: ParityConfig) -> Parity {
    match parity {
        ParityConfig::None => Parity::None,
        ParityConfig::Even => Parity::Even,
        ParityConfig::Odd => Parity::Odd,
    }
}

fn map_stop_bits(bits: u8) -> StopBits {
    match bits {
        2 => StopBits::Two,
        _ => StopBits::One,
    }
}
