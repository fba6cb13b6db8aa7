//! MC 3E ASCII protocol client (SPEC_FULL.md §4.1).
//!
//! Grounded on `examples/original_source/backend/src/plc/mc3e_client.py`
//! (`MC3EClient`), which wraps `pymcprotocol.Type3E`. This client builds and
//! parses MC 3E ASCII frames directly over the [`PlcTransport`] seam instead
//! of shelling out to a Python binding.

use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

use crate::errors::{CollectorError, CollectorResult};
use crate::plc::address::{group_continuous_addresses, AddressRun};
use crate::plc::transport::PlcTransport;
use crate::plc::value::TagValue;
use std::collections::HashMap;

const SUBHEADER: &str = "5000";
const NETWORK_NO: &str = "00";
const PC_NO: &str = "FF";
const REQUEST_DEST_MODULE_IO: &str = "03FF";
const REQUEST_DEST_MODULE_STATION: &str = "00";
const CPU_MONITORING_TIMER: &str = "0010";
const BATCH_READ_COMMAND: &str = "0401";
const SUBCOMMAND_WORD: &str = "0000";
const SUBCOMMAND_BIT: &str = "0001";

/// One PLC's MC 3E ASCII client, bound to a single [`PlcTransport`]
/// connection. Owned by a [`crate::plc::pool::ConnectionPool`] slot.
pub struct Mc3eClient<T: PlcTransport> {
    pub plc_code: String,
    transport: T,
    read_timeout: Duration,
}

impl<T: PlcTransport> Mc3eClient<T> {
    pub fn new(plc_code: String, transport: T, read_timeout: Duration) -> Self {
        Self {
            plc_code,
            transport,
            read_timeout,
        }
    }

    pub async fn close(&mut self) {
        self.transport.close().await;
    }

    /// Reads a single tag address, bypassing address grouping.
    pub async fn read_single(&mut self, tag_address: &str) -> CollectorResult<TagValue> {
        let mut out = self.read_batch(std::slice::from_ref(&tag_address.to_string())).await?;
        out.remove(tag_address).ok_or_else(|| CollectorError::ReadError {
            plc_code: self.plc_code.clone(),
            message: format!("tag {tag_address} missing from response"),
        })
    }

    /// Reads a set of tag addresses, grouping contiguous word addresses into
    /// a single batch read per run and falling back to per-tag reads if a
    /// group read fails (mirrors the Python client's fallback behavior).
    pub async fn read_batch(
        &mut self,
        tag_addresses: &[String],
    ) -> CollectorResult<HashMap<String, TagValue>> {
        if tag_addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let start = Instant::now();
        let runs = group_continuous_addresses(tag_addresses);
        debug!(
            plc_code = %self.plc_code,
            tags = tag_addresses.len(),
            groups = runs.len(),
            "batch reading"
        );

        let mut results = HashMap::new();
        let mut any_error = None;

        for run in &runs {
            match self.read_run(run).await {
                Ok(values) => results.extend(values),
                Err(e) => {
                    warn!(
                        plc_code = %self.plc_code,
                        run = %format!("{}{}", run.device_family, run.head_device),
                        error = %e,
                        "group read failed, falling back to individual reads"
                    );
                    for addr in &run.addresses {
                        match self.read_run(&AddressRun {
                            device_family: run.device_family.clone(),
                            head_device: run.head_device,
                            count: 1,
                            addresses: vec![addr.clone()],
                        }).await {
                            Ok(v) => {
                                results.extend(v);
                            }
                            Err(e2) => {
                                error!(plc_code = %self.plc_code, tag = %addr, error = %e2, "individual read failed");
                                any_error = Some(e2);
                            }
                        }
                    }
                }
            }
        }

        let elapsed = start.elapsed();
        debug!(plc_code = %self.plc_code, elapsed_ms = elapsed.as_millis(), read = results.len(), "batch read complete");

        if results.is_empty() && any_error.is_some() {
            return Err(any_error.unwrap());
        }
        Ok(results)
    }

    async fn read_run(&mut self, run: &AddressRun) -> CollectorResult<HashMap<String, TagValue>> {
        let bit_mode = run.count == 1 && run.addresses[0].contains('.');
        let frame = build_read_frame(&run.device_family, run.head_device, run.count, bit_mode);

        let response = self
            .transport
            .request(frame.as_bytes(), self.read_timeout)
            .await
            .map_err(|e| classify_io_error(&self.plc_code, e))?;

        parse_read_response(&self.plc_code, &response, run, bit_mode)
    }
}

fn classify_io_error(plc_code: &str, e: std::io::Error) -> CollectorError {
    match e.kind() {
        std::io::ErrorKind::TimedOut => CollectorError::Timeout {
            plc_code: plc_code.to_string(),
            message: e.to_string(),
        },
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::UnexpectedEof
        | std::io::ErrorKind::BrokenPipe => CollectorError::ConnectionFailed {
            plc_code: plc_code.to_string(),
            message: e.to_string(),
        },
        _ => CollectorError::ReadError {
            plc_code: plc_code.to_string(),
            message: e.to_string(),
        },
    }
}

fn device_code(family: &str) -> &'static str {
    match family {
        "D" => "D*",
        "W" => "W*",
        "M" => "M*",
        "X" => "X*",
        "Y" => "Y*",
        "B" => "B*",
        _ => "D*",
    }
}

/// Builds an MC 3E ASCII frame for a word- or bit-unit batch read.
/// Format (simplified ASCII framing): subheader, network, PC, dest I/O,
/// dest station, request length, CPU timer, command, subcommand, device
/// code, head device (hex, 6 digits), device points (hex, 4 digits).
fn build_read_frame(family: &str, head_device: u32, count: u32, bit_mode: bool) -> String {
    let subcommand = if bit_mode { SUBCOMMAND_BIT } else { SUBCOMMAND_WORD };
    let device = device_code(family);
    let head_hex = format!("{head_device:06X}");
    let count_hex = format!("{count:04X}");

    let body = format!(
        "{PC_NO}{REQUEST_DEST_MODULE_IO}{REQUEST_DEST_MODULE_STATION}{CPU_MONITORING_TIMER}{BATCH_READ_COMMAND}{subcommand}{device}{head_hex}{count_hex}"
    );
    let request_len = format!("{:04X}", body.len() + 4);

    format!("{SUBHEADER}{NETWORK_NO}{request_len}{body}")
}

/// Parses the fixed-width ASCII response body into tag values. Errors out
/// with [`CollectorError::ProtocolError`] on a non-zero end code, mirroring
/// `_parse_error_code` in the Python client.
fn parse_read_response(
    plc_code: &str,
    response: &[u8],
    run: &AddressRun,
    bit_mode: bool,
) -> CollectorResult<HashMap<String, TagValue>> {
    let text = std::str::from_utf8(response).map_err(|_| CollectorError::ProtocolError {
        plc_code: plc_code.to_string(),
        error_code: None,
        message: "response was not valid ASCII".into(),
    })?;

    if text.len() < 4 {
        return Err(CollectorError::ReadError {
            plc_code: plc_code.to_string(),
            message: "response too short to contain an end code".into(),
        });
    }

    let end_code = &text[..4];
    if end_code != "0000" {
        return Err(CollectorError::ProtocolError {
            plc_code: plc_code.to_string(),
            error_code: Some(end_code.to_string()),
            message: format!("PLC returned end code {end_code}"),
        });
    }

    let payload = &text[4..];
    let mut out = HashMap::new();

    if bit_mode {
        let bit = payload.chars().next().unwrap_or('0') == '1';
        out.insert(run.addresses[0].clone(), TagValue::Boolean(bit));
        return Ok(out);
    }

    for (i, addr) in run.addresses.iter().enumerate() {
        let start = i * 4;
        let end = start + 4;
        if end > payload.len() {
            break;
        }
        let word = i32::from_str_radix(&payload[start..end], 16).unwrap_or(0);
        out.insert(addr.clone(), TagValue::Integer(word as i64));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plc::transport::mock::MockTransport;

    #[tokio::test]
    async fn reads_contiguous_word_run() {
        let response = b"0000".to_vec();
        let mut response = response;
        response.extend_from_slice(b"00010002");
        let transport = MockTransport::new(vec![Ok(response)]);
        let mut client = Mc3eClient::new("P1".into(), transport, Duration::from_secs(1));

        let values = client
            .read_batch(&["D100".into(), "D101".into()])
            .await
            .unwrap();
        assert_eq!(values["D100"], TagValue::Integer(1));
        assert_eq!(values["D101"], TagValue::Integer(2));
    }

    #[tokio::test]
    async fn protocol_error_on_nonzero_end_code() {
        let transport = MockTransport::new(vec![Ok(b"4031".to_vec())]);
        let mut client = Mc3eClient::new("P1".into(), transport, Duration::from_secs(1));

        let err = client.read_single("D100").await.unwrap_err();
        match err {
            CollectorError::ProtocolError { error_code, .. } => {
                assert_eq!(error_code.as_deref(), Some("4031"));
            }
            other => panic!("expected ProtocolError, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_empty_map() {
        let transport = MockTransport::new(vec![]);
        let mut client = Mc3eClient::new("P1".into(), transport, Duration::from_secs(1));
        let values = client.read_batch(&[]).await.unwrap();
        assert!(values.is_empty());
    }

    #[tokio::test]
    async fn bit_addressed_tag_reads_boolean() {
        let transport = MockTransport::new(vec![Ok(b"00001".to_vec())]);
        let mut client = Mc3eClient::new("P1".into(), transport, Duration::from_secs(1));
        let value = client.read_single("W100C.6").await.unwrap();
        assert_eq!(value, TagValue::Boolean(true));
    }
}
