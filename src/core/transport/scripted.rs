//! In-memory chamber used by the unit tests
//!
//! Answers SIMSERV frames like a controller would: the power channel toggles
//! the running state, the nominal temperature is stored, and actual
//! temperature reads consume a queue of readings before settling on the
//! nominal value.

use super::{Transport, TransportError};
use crate::core::protocol::{CommandCode, CommandFrame, ResponseFrame};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ChamberModel {
    running: bool,
    status_override: Option<String>,
    nominal: f64,
    readings: VecDeque<String>,
    channels: HashMap<String, String>,
    failures: HashMap<CommandCode, String>,
    cancel_after_reads: Option<(usize, CancellationToken)>,
    reads: usize,
}

/// Scripted chamber
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    model: Mutex<ChamberModel>,
    sent: Mutex<Vec<Vec<String>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Start in the running (busy) state
    pub(crate) fn busy() -> Self {
        let transport = Self::new();
        transport.model.lock().running = true;
        transport
    }

    /// Report a fixed status code regardless of the running state
    pub(crate) fn with_status(self, code: &str) -> Self {
        self.model.lock().status_override = Some(code.to_string());
        self
    }

    /// Queue actual temperature readings
    pub(crate) fn with_readings(self, readings: &[&str]) -> Self {
        self.model
            .lock()
            .readings
            .extend(readings.iter().map(|r| r.to_string()));
        self
    }

    /// Answer `code` with an error status
    pub(crate) fn failing(self, code: CommandCode, status: &str) -> Self {
        self.model.lock().failures.insert(code, status.to_string());
        self
    }

    /// Cancel `token` once `reads` actual temperature reads have been served
    pub(crate) fn cancel_after_reads(self, reads: usize, token: CancellationToken) -> Self {
        self.model.lock().cancel_after_reads = Some((reads, token));
        self
    }

    /// Every frame received, in order
    pub(crate) fn sent(&self) -> Vec<Vec<String>> {
        self.sent.lock().clone()
    }

    /// Frames whose command field is `code`
    pub(crate) fn count(&self, code: CommandCode) -> usize {
        let wire = code.as_wire();
        self.sent.lock().iter().filter(|f| f[0] == wire).count()
    }

    /// Number of `stop` frames (power channel set to 0)
    pub(crate) fn stops(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|f| is_power_write(f, "0"))
            .count()
    }

    /// Nominal temperatures written, in order
    /// Stops sent by the gate right before a set-temperature
    pub(crate) fn gate_stops(&self) -> usize {
        let wire = CommandCode::SetNominalTemperature.as_wire();
        self.sent
            .lock()
            .windows(2)
            .filter(|w| is_power_write(&w[0], "0") && w[1][0] == wire)
            .count()
    }

    pub(crate) fn targets(&self) -> Vec<String> {
        let wire = CommandCode::SetNominalTemperature.as_wire();
        self.sent
            .lock()
            .iter()
            .filter(|f| f[0] == wire)
            .map(|f| f[3].clone())
            .collect()
    }

    fn answer(&self, fields: &[String]) -> Vec<String> {
        let mut model = self.model.lock();
        let code = match CommandCode::from_wire(&fields[0]) {
            Some(code) => code,
            None => return vec!["-5".to_string()],
        };

        if let Some(status) = model.failures.get(&code) {
            return vec![status.clone()];
        }

        match code {
            CommandCode::GetStatus => {
                let status = model
                    .status_override
                    .clone()
                    .unwrap_or_else(|| if model.running { "2" } else { "1" }.to_string());
                vec!["1".to_string(), status]
            }
            CommandCode::SetNominalTemperature => {
                model.nominal = fields[3].parse().unwrap_or_default();
                vec!["1".to_string()]
            }
            CommandCode::GetNominalTemperature => vec!["1".to_string(), model.nominal.to_string()],
            CommandCode::GetActualTemperature => {
                model.reads += 1;
                if let Some((after, token)) = &model.cancel_after_reads {
                    if model.reads >= *after {
                        token.cancel();
                    }
                }
                let reading = model
                    .readings
                    .pop_front()
                    .unwrap_or_else(|| model.nominal.to_string());
                vec!["1".to_string(), reading]
            }
            CommandCode::SetDigitalChannel => {
                if fields[2] == "1" {
                    model.running = fields[3] == "1";
                }
                model.channels.insert(fields[2].clone(), fields[3].clone());
                vec!["1".to_string()]
            }
            CommandCode::GetDigitalChannel => {
                let value = model.channels.get(&fields[2]).cloned().unwrap_or_else(|| "0".to_string());
                vec!["1".to_string(), value]
            }
        }
    }
}

pub(crate) fn is_power_write(fields: &[String], value: &str) -> bool {
    fields.len() == 4 && fields[0] == "14001" && fields[2] == "1" && fields[3] == value
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn exchange(&self, frame: &CommandFrame) -> Result<ResponseFrame, TransportError> {
        let fields = frame.fields().to_vec();
        self.sent.lock().push(fields.clone());
        Ok(ResponseFrame::new(self.answer(&fields))?)
    }

    fn connection_info(&self) -> String {
        "scripted".to_string()
    }
}
