//! Serial port discovery.
//!
//! When no explicit port is configured, the first system serial port whose
//! descriptor matches one of the configured substrings (case-insensitive)
//! is selected.

use serialport::{SerialPortInfo, SerialPortType};

use crate::error::SerialSessionError;

/// Default substrings matching the instrument's device family.
pub const DEFAULT_DEVICE_SUBSTRINGS: &[&str] = &["arduino"];

/// Enumerate system serial ports and select the first match.
pub fn discover_port(substrings: &[&str]) -> Result<String, SerialSessionError> {
    let ports = serialport::available_ports().map_err(|e| SerialSessionError::Io(e.to_string()))?;
    select_port(&ports, substrings)
}

/// Pick the first port in `ports` whose descriptor matches `substrings`.
/// Split out from [`discover_port`] so tests can supply a fixed port list
/// instead of depending on the host's actual hardware.
pub fn select_port(
    ports: &[SerialPortInfo],
    substrings: &[&str],
) -> Result<String, SerialSessionError> {
    ports
        .iter()
        .find(|p| matches_any(p, substrings))
        .map(|p| p.port_name.clone())
        .ok_or(SerialSessionError::DeviceNotFound)
}

fn matches_any(port: &SerialPortInfo, substrings: &[&str]) -> bool {
    let desc = describe(port).to_lowercase();
    substrings.iter().any(|s| desc.contains(&s.to_lowercase()))
}

fn describe(port: &SerialPortInfo) -> String {
    match &port.port_type {
        SerialPortType::UsbPort(info) => format!(
            "{} {} {}",
            port.port_name,
            info.manufacturer.clone().unwrap_or_default(),
            info.product.clone().unwrap_or_default()
        ),
        _ => port.port_name.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serialport::{SerialPortType, UsbPortInfo};

    fn usb_port(name: &str, product: &str) -> SerialPortInfo {
        SerialPortInfo {
            port_name: name.to_owned(),
            port_type: SerialPortType::UsbPort(UsbPortInfo {
                vid: 0x2341,
                pid: 0x0043,
                serial_number: None,
                manufacturer: Some("Arduino LLC".to_owned()),
                product: Some(product.to_owned()),
                #[cfg(feature = "usbportinfo-interface")]
                interface: None,
            }),
        }
    }

    #[test]
    fn selects_first_matching_port() {
        let ports = vec![
            usb_port("/dev/ttyUSB0", "FTDI Adapter"),
            usb_port("/dev/ttyACM0", "Arduino Due"),
        ];
        assert_eq!(
            select_port(&ports, DEFAULT_DEVICE_SUBSTRINGS).unwrap(),
            "/dev/ttyACM0"
        );
    }

    #[test]
    fn device_not_found_when_nothing_matches() {
        let ports = vec![usb_port("/dev/ttyUSB0", "FTDI Adapter")];
        assert!(matches!(
            select_port(&ports, DEFAULT_DEVICE_SUBSTRINGS),
            Err(SerialSessionError::DeviceNotFound)
        ));
    }
}
