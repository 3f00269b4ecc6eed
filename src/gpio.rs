//! ==============================================================================
//! gpio.rs - hardware drivers for the dht11 sensor and the ads1115 adc
//! ==============================================================================
//!
//! purpose:
//!     talks to the real peripherals on a raspberry pi. the trait-facing side
//!     lives in hal.rs; this file only knows about pins, registers and volts.
//!
//! relationships:
//!     - used by: hal.rs (Hal, feature = "hardware")
//!     - uses: python3/adafruit_dht (via subprocess for reliable timing;
//!       the subprocess is killed at its deadline)
//!     - uses: rppal i2c (feature = "hardware")
//!
//! why subprocess to python?:
//!     dht11 sensors require precise bit-banging timing (~microseconds).
//!     pure rust in userspace is unreliable due to lack of real-time guarantees.
//!     adafruit_dht handles this correctly with retries and timing compensation.
//!
//! ==============================================================================

use std::process::{Command, Output, Stdio};
use std::time::{Duration, Instant};

use crate::error::SensorError;

pub const DHT11: &str = "dht11";
pub const ADS1115: &str = "ads1115";

/// conversion result register
pub const ADS1115_REG_CONVERSION: u8 = 0x00;
/// config register
pub const ADS1115_REG_CONFIG: u8 = 0x01;
/// volts per lsb at gain 1 (+/-4.096 V full scale)
pub const ADS1115_VOLTS_PER_LSB: f64 = 4.096 / 32768.0;

/// how often a running helper is checked for exit
const HELPER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// read the dht11 temperature in whole degrees celsius
///
/// blocking; callers run this on a blocking thread. the python helper is
/// killed once `deadline` passes.
pub fn read_dht11(pin: u8, deadline: Duration) -> Result<i32, SensorError> {
    let script = format!(
        r#"
import sys
try:
    import adafruit_dht
    import board
    import json

    dht = adafruit_dht.DHT11(board.D{})

    try:
        t = dht.temperature
        if t is not None:
            print(json.dumps({{"t": t}}))
        else:
            print("null")
    finally:
        dht.exit()
except Exception as e:
    # Print ONLY the error message to stderr (no traceback with paths)
    print(str(e), file=sys.stderr)
    sys.exit(1)
"#,
        pin
    );

    let mut command = Command::new("python3");
    command.arg("-c").arg(&script);
    dht_result(run_with_deadline(command, DHT11, deadline)?)
}

/// run a helper process, killing and reaping it if it outlives `deadline`
pub fn run_with_deadline(
    mut command: Command,
    sensor: &'static str,
    deadline: Duration,
) -> Result<Output, SensorError> {
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| SensorError::driver(sensor, format!("failed to spawn helper: {}", e)))?;

    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(_)) => break,
            Ok(None) if started.elapsed() >= deadline => {
                if let Err(e) = child.kill() {
                    tracing::warn!(sensor, error = %e, "failed to kill sensor helper");
                }
                let _ = child.wait();
                return Err(SensorError::Timeout {
                    sensor,
                    millis: deadline.as_millis() as u64,
                });
            }
            Ok(None) => std::thread::sleep(HELPER_POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(SensorError::driver(sensor, e));
            }
        }
    }

    child.wait_with_output().map_err(|e| SensorError::driver(sensor, e))
}

/// interpret the finished dht helper
pub fn dht_result(output: Output) -> Result<i32, SensorError> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(SensorError::driver(DHT11, stderr.trim()));
    }

    parse_dht_output(&String::from_utf8_lossy(&output.stdout))
}

/// parse the one-line json the dht helper prints
pub fn parse_dht_output(stdout: &str) -> Result<i32, SensorError> {
    let stdout = stdout.trim();
    if stdout == "null" || stdout.is_empty() {
        return Err(SensorError::driver(DHT11, "sensor returned null"));
    }

    let parsed: serde_json::Value = serde_json::from_str(stdout)
        .map_err(|e| SensorError::driver(DHT11, format!("json parse error: {} (got: {})", e, stdout)))?;

    let temp = parsed["t"]
        .as_f64()
        .ok_or_else(|| SensorError::driver(DHT11, "missing temperature"))?;

    // dht11 range is 0-50 C; anything far outside is a bad frame
    if !temp.is_finite() || !(-40.0..=80.0).contains(&temp) {
        return Err(SensorError::Implausible { sensor: DHT11, value: temp.to_string() });
    }

    Ok(temp as i32)
}

/// single-shot, single-ended config word for `channel` (0-3)
///
/// OS=1 start, MUX=100+ch, PGA=001 (+/-4.096 V), MODE=1 single-shot,
/// DR=100 (128 SPS), comparator disabled.
pub fn ads1115_config_word(channel: u8) -> u16 {
    let mux = 0b100 | ((channel as u16) & 0b11);
    0x8000 | (mux << 12) | (0b001 << 9) | (1 << 8) | (0b100 << 5) | 0b11
}

/// convert the big-endian conversion register to volts
pub fn ads1115_raw_to_volts(raw: [u8; 2]) -> f64 {
    i16::from_be_bytes(raw) as f64 * ADS1115_VOLTS_PER_LSB
}

/// run one conversion on `channel` and return the voltage
#[cfg(feature = "hardware")]
pub fn read_ads1115(addr: u8, channel: u8) -> Result<f64, SensorError> {
    use rppal::i2c::I2c;

    let mut i2c = I2c::new().map_err(|e| SensorError::driver(ADS1115, e))?;
    i2c.set_slave_address(addr as u16)
        .map_err(|e| SensorError::driver(ADS1115, e))?;

    let config = ads1115_config_word(channel).to_be_bytes();
    i2c.write(&[ADS1115_REG_CONFIG, config[0], config[1]])
        .map_err(|e| SensorError::driver(ADS1115, e))?;

    // 128 SPS -> ~7.8 ms per conversion; poll the OS bit a few times
    let mut status = [0u8; 2];
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(9));
        i2c.write_read(&[ADS1115_REG_CONFIG], &mut status)
            .map_err(|e| SensorError::driver(ADS1115, e))?;
        if status[0] & 0x80 != 0 {
            let mut raw = [0u8; 2];
            i2c.write_read(&[ADS1115_REG_CONVERSION], &mut raw)
                .map_err(|e| SensorError::driver(ADS1115, e))?;
            return Ok(ads1115_raw_to_volts(raw));
        }
    }

    Err(SensorError::driver(ADS1115, "conversion never completed"))
}

// ==============================================================================
// tests
// ==============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_word_channel_zero() {
        assert_eq!(ads1115_config_word(0), 0xC383);
        assert_eq!(ads1115_config_word(3), 0xF383);
    }

    #[test]
    fn test_raw_to_volts() {
        // 0x3B60 = 15200 counts * 125 uV
        let v = ads1115_raw_to_volts([0x3B, 0x60]);
        assert!((v - 1.9).abs() < 1e-9);
        assert_eq!(ads1115_raw_to_volts([0, 0]), 0.0);
        assert!(ads1115_raw_to_volts([0xFF, 0xFF]) < 0.0);
    }

    #[test]
    fn test_parse_dht_output() {
        assert_eq!(parse_dht_output("{\"t\": 22.0}\n").unwrap(), 22);
        assert_eq!(parse_dht_output("{\"t\": 23.9}").unwrap(), 23);
        assert!(matches!(parse_dht_output("null"), Err(SensorError::Driver { .. })));
        assert!(matches!(parse_dht_output(""), Err(SensorError::Driver { .. })));
        assert!(matches!(parse_dht_output("{\"h\": 40}"), Err(SensorError::Driver { .. })));
        assert!(matches!(
            parse_dht_output("{\"t\": 250.0}"),
            Err(SensorError::Implausible { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_hung_helper_is_killed_at_deadline() {
        let mut command = Command::new("sleep");
        command.arg("5");

        let started = Instant::now();
        let err = run_with_deadline(command, DHT11, Duration::from_millis(100)).unwrap_err();
        assert!(matches!(err, SensorError::Timeout { sensor: DHT11, millis: 100 }));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[cfg(unix)]
    #[test]
    fn test_helper_output_is_parsed() {
        let mut command = Command::new("sh");
        command.arg("-c").arg(r#"echo '{"t": 21.0}'"#);
        let output = run_with_deadline(command, DHT11, Duration::from_secs(5)).unwrap();
        assert_eq!(dht_result(output).unwrap(), 21);

        let mut command = Command::new("sh");
        command.arg("-c").arg("echo 'DHT sensor not found' >&2; exit 1");
        let output = run_with_deadline(command, DHT11, Duration::from_secs(5)).unwrap();
        let err = dht_result(output).unwrap_err();
        assert!(err.to_string().contains("DHT sensor not found"));
    }

    #[test]
    fn test_missing_helper_binary() {
        let command = Command::new("definitely-not-a-python-binary");
        let err = run_with_deadline(command, DHT11, Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, SensorError::Driver { sensor: DHT11, .. }));
    }

    // note: hardware tests require actual pi and are not run in ci
    // #[test]
    // fn test_dht11() {
    //     println!("dht11 result: {:?}", read_dht11(4, Duration::from_secs(2)));
    // }
}
