//! Capture decoders built on tshark's JSON packet dissection
//!
//! Bluetooth LE advertisements carry no sequence number, so BLE readings are
//! correlated on the capture timestamp quantized to `token_quantum_secs`.
//! This assumes the skew between sniffer clocks is small compared to the
//! quantum. Wi-Fi scan requests carry an 802.11 sequence number, which is
//! used as the token directly.

use crate::core::{Reading, DEFAULT_DECODER_TIMEOUT_MS, DEFAULT_TOKEN_QUANTUM_SECS};
use crate::processing::decoder::{read_source, DecodeError, DecodedBatch, ReadingDecoder, SourceSpec};
use serde_json::Value;
use std::io::Read;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// 802.11 management subtype sent by actively scanning stations
const SCAN_REQUEST_SUBTYPE: i64 = 0x0004;

/// Display filter applied when dissecting Wi-Fi captures
const SCAN_REQUEST_FILTER: &str = "wlan.fc.type_subtype == 0x0004";

/// What the configured source path contains
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TsharkInput {
    /// Output of `tshark -T json` saved to a file
    ExportedJson,
    /// Raw capture that is dissected by running tshark
    Capture,
}

/// How to start tshark and how long to wait for it
#[derive(Debug, Clone)]
pub struct TsharkProcess {
    pub executable: String,
    /// Wall-clock limit for the tshark process (milliseconds)
    pub timeout_ms: u64,
}

impl Default for TsharkProcess {
    fn default() -> Self {
        Self {
            executable: "tshark".to_string(),
            timeout_ms: DEFAULT_DECODER_TIMEOUT_MS,
        }
    }
}

impl TsharkProcess {
    /// Run `tshark -q -r <capture> [display_filter] -T json` and collect its output
    pub fn dissect(&self, source: &SourceSpec, display_filter: Option<&str>) -> Result<String, DecodeError> {
        let name = source.display_name();
        debug!(executable = %self.executable, source = %name, filter = ?display_filter, "running tshark");

        let mut command = Command::new(&self.executable);
        command.arg("-q").arg("-r").arg(&source.path);
        if let Some(filter) = display_filter {
            command.arg("-Y").arg(filter);
        }
        let mut child = command
            .args(["-T", "json"])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DecodeError::ProcessFailed {
                source: name.clone(),
                details: format!("cannot start '{}': {}", self.executable, e),
            })?;

        let mut stdout = child.stdout.take().ok_or_else(|| DecodeError::ProcessFailed {
            source: name.clone(),
            details: "stdout not captured".to_string(),
        })?;
        let reader = thread::spawn(move || {
            let mut buffer = String::new();
            stdout.read_to_string(&mut buffer).map(|_| buffer)
        });

        let deadline = Instant::now() + Duration::from_millis(self.timeout_ms);
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(DecodeError::Timeout {
                        source: name,
                        timeout_ms: self.timeout_ms,
                    });
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    return Err(DecodeError::ProcessFailed {
                        source: name,
                        details: e.to_string(),
                    })
                }
            }
        };

        let output = reader
            .join()
            .map_err(|_| DecodeError::ProcessFailed {
                source: name.clone(),
                details: "output reader panicked".to_string(),
            })?
            .map_err(|e| DecodeError::ProcessFailed {
                source: name.clone(),
                details: format!("reading tshark output: {}", e),
            })?;

        if !status.success() {
            return Err(DecodeError::ProcessFailed {
                source: name,
                details: format!("tshark exited with {}", status),
            });
        }
        Ok(output)
    }
}

/// Parse the packet array produced by `tshark -T json` and convert each packet
fn decode_packets<F>(content: &str, source: &SourceSpec, mut convert: F) -> Result<DecodedBatch, DecodeError>
where
    F: FnMut(&Value) -> Result<Reading, String>,
{
    let packets: Vec<Value> = serde_json::from_str(content).map_err(|e| DecodeError::InvalidFormat {
        source: source.display_name(),
        details: format!("expected tshark JSON packet array: {}", e),
    })?;

    let mut batch = DecodedBatch::for_source(source.display_name());
    for (index, packet) in packets.iter().enumerate() {
        match convert(packet) {
            Ok(reading) => batch.push(reading),
            Err(reason) => batch.reject(format!("packet {}: {}", index, reason)),
        }
    }

    info!(
        sniffer = %source.sniffer_id,
        readings = batch.readings.len(),
        malformed = batch.malformed,
        "sniffer capture decoded"
    );
    Ok(batch)
}

fn packet_layers(packet: &Value) -> Result<&Value, String> {
    packet
        .get("_source")
        .and_then(|s| s.get("layers"))
        .ok_or_else(|| "no dissected layers".to_string())
}

/// Bluetooth HCI LE advertising reports
#[derive(Debug, Clone)]
pub struct TsharkBleDecoder {
    pub input: TsharkInput,
    /// Width of a correlation time bucket (seconds)
    pub token_quantum_secs: f64,
    pub process: TsharkProcess,
}

impl TsharkBleDecoder {
    pub fn new(input: TsharkInput) -> Self {
        Self {
            input,
            token_quantum_secs: DEFAULT_TOKEN_QUANTUM_SECS,
            process: TsharkProcess::default(),
        }
    }

    pub fn with_token_quantum(mut self, quantum_secs: f64) -> Self {
        self.token_quantum_secs = quantum_secs;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.process.timeout_ms = timeout_ms;
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.process.executable = executable.into();
        self
    }

    /// Map a capture timestamp to its correlation bucket
    pub fn quantize(&self, epoch_secs: f64) -> i64 {
        (epoch_secs / self.token_quantum_secs).floor() as i64
    }

    pub fn decode_json(&self, content: &str, source: &SourceSpec) -> Result<DecodedBatch, DecodeError> {
        decode_packets(content, source, |packet| self.packet_to_reading(packet, &source.sniffer_id))
    }

    fn packet_to_reading(&self, packet: &Value, sniffer_id: &str) -> Result<Reading, String> {
        let layers = packet_layers(packet)?;
        let event = layers.get("bthci_evt").ok_or("no bthci_evt layer")?;

        let address = event
            .get("bthci_evt.bd_addr")
            .and_then(Value::as_str)
            .ok_or("missing bthci_evt.bd_addr")?;
        let rssi = event
            .get("bthci_evt.rssi")
            .and_then(numeric)
            .ok_or("missing or invalid bthci_evt.rssi")?;
        let epoch = layers
            .get("frame")
            .and_then(|f| f.get("frame.time_epoch"))
            .and_then(numeric)
            .ok_or("missing or invalid frame.time_epoch")?;

        Ok(Reading::new(address, self.quantize(epoch), sniffer_id, rssi.round() as i32))
    }
}

impl ReadingDecoder for TsharkBleDecoder {
    fn name(&self) -> &'static str {
        match self.input {
            TsharkInput::ExportedJson => "tshark-json",
            TsharkInput::Capture => "tshark-capture",
        }
    }

    fn decode(&self, source: &SourceSpec) -> Result<DecodedBatch, DecodeError> {
        let content = match self.input {
            TsharkInput::ExportedJson => read_source(source)?,
            TsharkInput::Capture => self.process.dissect(source, None)?,
        };
        self.decode_json(&content, source)
    }
}

/// 802.11 scan requests (management subtype 4) from a monitor-mode capture with radiotap headers
///
/// The transmitter is the source address and the token is the frame's
/// sequence number. Frames other than scan requests are counted as
/// malformed.
#[derive(Debug, Clone)]
pub struct TsharkWlanDecoder {
    pub input: TsharkInput,
    pub process: TsharkProcess,
}

impl TsharkWlanDecoder {
    pub fn new(input: TsharkInput) -> Self {
        Self {
            input,
            process: TsharkProcess::default(),
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.process.timeout_ms = timeout_ms;
        self
    }

    pub fn with_executable(mut self, executable: impl Into<String>) -> Self {
        self.process.executable = executable.into();
        self
    }

    pub fn decode_json(&self, content: &str, source: &SourceSpec) -> Result<DecodedBatch, DecodeError> {
        decode_packets(content, source, |packet| self.packet_to_reading(packet, &source.sniffer_id))
    }

    fn packet_to_reading(&self, packet: &Value, sniffer_id: &str) -> Result<Reading, String> {
        let layers = packet_layers(packet)?;
        let wlan = layers.get("wlan").ok_or("no wlan layer")?;

        if let Some(subtype) = wlan.get("wlan.fc.type_subtype") {
            match integer(subtype) {
                Some(SCAN_REQUEST_SUBTYPE) => {}
                Some(other) => return Err(format!("not a scan request (subtype {:#06x})", other)),
                None => return Err("invalid wlan.fc.type_subtype".to_string()),
            }
        }

        let address = wlan
            .get("wlan.sa")
            .or_else(|| wlan.get("wlan.ta"))
            .and_then(Value::as_str)
            .ok_or("missing wlan.sa")?;
        let sequence = wlan
            .get("wlan.seq")
            .and_then(integer)
            .ok_or("missing or invalid wlan.seq")?;
        let rssi = layers
            .get("radiotap")
            .and_then(|r| r.get("radiotap.dbm_antsignal"))
            .or_else(|| layers.get("wlan_radio").and_then(|r| r.get("wlan_radio.signal_dbm")))
            .and_then(numeric)
            .ok_or("missing or invalid radiotap.dbm_antsignal")?;

        Ok(Reading::new(address, sequence, sniffer_id, rssi.round() as i32))
    }
}

impl ReadingDecoder for TsharkWlanDecoder {
    fn name(&self) -> &'static str {
        match self.input {
            TsharkInput::ExportedJson => "tshark-wlan-json",
            TsharkInput::Capture => "tshark-wlan-capture",
        }
    }

    fn decode(&self, source: &SourceSpec) -> Result<DecodedBatch, DecodeError> {
        let content = match self.input {
            TsharkInput::ExportedJson => read_source(source)?,
            TsharkInput::Capture => self.process.dissect(source, Some(SCAN_REQUEST_FILTER))?,
        };
        self.decode_json(&content, source)
    }
}

/// tshark renders numbers as strings; accept either, and the first of
/// repeated fields (one per antenna)
fn numeric(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        Value::Array(values) => return values.first().and_then(numeric),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

/// Integer field in decimal or `0x` hex notation
fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => {
            let s = s.trim();
            match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                Some(hex) => i64::from_str_radix(hex, 16).ok(),
                None => s.parse::<i64>().ok(),
            }
        }
        Value::Array(values) => values.first().and_then(integer),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLE_EXPORT: &str = r#"[
      {"_source": {"layers": {
        "frame": {"frame.time_epoch": "1700000000.250000000"},
        "bthci_evt": {"bthci_evt.bd_addr": "c0:ff:ee:00:00:01", "bthci_evt.rssi": "-63"}
      }}},
      {"_source": {"layers": {
        "frame": {"frame.time_epoch": "1700000000.900000000"},
        "bthci_evt": {"bthci_evt.bd_addr": "c0:ff:ee:00:00:01", "bthci_evt.rssi": "-66"}
      }}},
      {"_source": {"layers": {
        "frame": {"frame.time_epoch": "1700000001.100000000"},
        "hci_h4": {}
      }}},
      {"_source": {"layers": {
        "frame": {"frame.time_epoch": "1700000002.000000000"},
        "bthci_evt": {"bthci_evt.bd_addr": "c0:ff:ee:00:00:02"}
      }}}
    ]"#;

    const WLAN_EXPORT: &str = r#"[
      {"_source": {"layers": {
        "radiotap": {"radiotap.dbm_antsignal": "-58"},
        "wlan": {"wlan.fc.type_subtype": "0x0004", "wlan.sa": "3a:11:22:33:44:55", "wlan.seq": "1021"}
      }}},
      {"_source": {"layers": {
        "radiotap": {"radiotap.dbm_antsignal": ["-61", "-63"]},
        "wlan": {"wlan.fc.type_subtype": "4", "wlan.ta": "3a:11:22:33:44:55", "wlan.seq": "1022"}
      }}},
      {"_source": {"layers": {
        "radiotap": {"radiotap.dbm_antsignal": "-40"},
        "wlan": {"wlan.fc.type_subtype": "0x0008", "wlan.sa": "00:00:5e:00:53:01", "wlan.seq": "7"}
      }}},
      {"_source": {"layers": {
        "wlan": {"wlan.fc.type_subtype": "0x0004", "wlan.sa": "3a:11:22:33:44:55", "wlan.seq": "1023"}
      }}},
      {"_source": {"layers": {
        "radiotap": {"radiotap.dbm_antsignal": "-70"},
        "wlan": {"wlan.sa": "3a:11:22:33:44:55"}
      }}}
    ]"#;

    #[cfg(unix)]
    fn fake_tshark(dir: &tempfile::TempDir, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.path().join("tshark");
        std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().to_string()
    }

    #[test]
    fn test_decode_ble_export() {
        let decoder = TsharkBleDecoder::new(TsharkInput::ExportedJson);
        let source = SourceSpec::new("sniffer-a", "a.json");
        let batch = decoder.decode_json(BLE_EXPORT, &source).unwrap();

        assert_eq!(batch.malformed, 2);
        assert_eq!(
            batch.readings,
            vec![
                Reading::new("c0:ff:ee:00:00:01", 1700000000, "sniffer-a", -63),
                Reading::new("c0:ff:ee:00:00:01", 1700000000, "sniffer-a", -66),
            ]
        );
    }

    #[test]
    fn test_decode_wlan_export() {
        let decoder = TsharkWlanDecoder::new(TsharkInput::ExportedJson);
        let source = SourceSpec::new("sniffer-w", "w.json");
        let batch = decoder.decode_json(WLAN_EXPORT, &source).unwrap();

        assert_eq!(
            batch.readings,
            vec![
                Reading::new("3a:11:22:33:44:55", 1021, "sniffer-w", -58),
                Reading::new("3a:11:22:33:44:55", 1022, "sniffer-w", -61),
            ]
        );
        // beacon, missing signal, missing sequence number
        assert_eq!(batch.malformed, 3);
        assert!(batch.malformed_samples[0].to_string().contains("not a scan request"));
    }

    #[test]
    fn test_token_quantum() {
        let decoder = TsharkBleDecoder::new(TsharkInput::ExportedJson).with_token_quantum(2.0);
        assert_eq!(decoder.quantize(1700000001.9), 850000000);
        assert_eq!(decoder.quantize(1700000002.0), 850000001);
    }

    #[test]
    fn test_numeric_fields() {
        assert_eq!(numeric(&Value::String(" -70 ".to_string())), Some(-70.0));
        assert_eq!(numeric(&serde_json::json!(-42)), Some(-42.0));
        assert_eq!(numeric(&serde_json::json!(["-55", "-57"])), Some(-55.0));
        assert_eq!(numeric(&Value::String("n/a".to_string())), None);
        assert_eq!(numeric(&Value::Null), None);

        assert_eq!(integer(&Value::String("0x0004".to_string())), Some(4));
        assert_eq!(integer(&Value::String("1021".to_string())), Some(1021));
        assert_eq!(integer(&Value::String("-58.5".to_string())), None);
    }

    #[test]
    fn test_missing_executable_is_process_failure() {
        let decoder = TsharkBleDecoder::new(TsharkInput::Capture)
            .with_executable("multilateration-test-no-such-tshark");
        let err = decoder.decode(&SourceSpec::new("s1", "capture.btsnoop")).unwrap_err();
        assert!(matches!(err, DecodeError::ProcessFailed { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_slow_tshark_is_killed_at_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = TsharkBleDecoder::new(TsharkInput::Capture)
            .with_executable(fake_tshark(&dir, "exec sleep 5"))
            .with_timeout_ms(200);

        let started = Instant::now();
        let err = decoder.decode(&SourceSpec::new("s1", "capture.btsnoop")).unwrap_err();
        assert_eq!(
            err,
            DecodeError::Timeout {
                source: "capture.btsnoop".to_string(),
                timeout_ms: 200
            }
        );
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_is_process_failure() {
        let dir = tempfile::tempdir().unwrap();
        let decoder = TsharkWlanDecoder::new(TsharkInput::Capture).with_executable(fake_tshark(&dir, "exit 2"));

        let err = decoder.decode(&SourceSpec::new("s1", "capture.pcapng")).unwrap_err();
        match err {
            DecodeError::ProcessFailed { details, .. } => assert!(details.contains("exited"), "{}", details),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_capture_output_is_decoded() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("cat <<'EOF'\n{}\nEOF", WLAN_EXPORT);
        let decoder = TsharkWlanDecoder::new(TsharkInput::Capture).with_executable(fake_tshark(&dir, &script));

        let batch = decoder.decode(&SourceSpec::new("s1", "capture.pcapng")).unwrap();
        assert_eq!(batch.readings.len(), 2);
        assert_eq!(batch.malformed, 3);
    }

    #[test]
    fn test_invalid_export_is_format_error() {
        let decoder = TsharkBleDecoder::new(TsharkInput::ExportedJson);
        let err = decoder
            .decode_json("not json", &SourceSpec::new("s1", "bad.json"))
            .unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFormat { .. }));
    }
}
