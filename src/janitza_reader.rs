use std::net::SocketAddr;

use async_trait::async_trait;
use tokio_modbus::prelude::*;
use tracing::info;

use crate::error::BridgeError;

/// Source of the raw register block.
#[async_trait]
pub trait RegisterSource: Send {
    /// Reads `count` consecutive 32 bit floats starting at register `base`.
    async fn read_floats(&mut self, base: u16, count: usize) -> Result<Vec<f32>, BridgeError>;
}

/// Janitza UMG meter over Modbus TCP.
pub struct JanitzaReader {
    connection: client::Context,
}

impl JanitzaReader {
    pub async fn connect(target_address: SocketAddr, unit: u8) -> Result<Self, BridgeError> {
        info!("Connecting to Janitza meter at {target_address} unit {unit}");
        let connection = tcp::connect_slave(target_address, Slave(unit))
            .await
            .map_err(|e| BridgeError::Transport(format!("connect to {target_address}: {e}")))?;
        info!("Connected to Janitza meter");
        Ok(Self { connection })
    }
}

#[async_trait]
impl RegisterSource for JanitzaReader {
    async fn read_floats(&mut self, base: u16, count: usize) -> Result<Vec<f32>, BridgeError> {
        let register_count = count * 2;
        let quantity = u16::try_from(register_count).map_err(|_| BridgeError::ResponseLength {
            expected: register_count,
            actual: 0,
        })?;

        // tokio-modbus returns Result<Result<Vec<u16>, ExceptionCode>, Error>
        let words = match self.connection.read_holding_registers(base, quantity).await {
            Ok(Ok(words)) => words,
            Ok(Err(exception)) => {
                return Err(BridgeError::ModbusException(format!("{exception:?}")))
            }
            Err(e) => return Err(BridgeError::Transport(e.to_string())),
        };

        if words.len() != register_count {
            return Err(BridgeError::ResponseLength {
                expected: register_count,
                actual: words.len(),
            });
        }
        Ok(words_to_f32(&words))
    }
}

/// Joins register pairs into floats, high word first.
pub fn words_to_f32(words: &[u16]) -> Vec<f32> {
    words
        .chunks_exact(2)
        .map(|pair| merge_u16_f32(pair[0], pair[1]))
        .collect()
}

fn merge_u16_f32(high: u16, low: u16) -> f32 {
    let combined: u32 = ((high as u32) << 16) | (low as u32);
    f32::from_bits(combined)
}
