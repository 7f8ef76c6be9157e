//! Serial port handling
//!
//! The controller bus runs at 9600 baud, 8N1, no flow control. Any
//! RS-485 adapter that shows up as a tty will do.

use std::collections::BTreeMap;

use serialport::{SerialPortInfo, SerialPortType};
use tokio_serial::{DataBits, FlowControl, Parity, SerialPortBuilderExt, SerialStream, StopBits};

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// A serial port that could carry the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path, such as `/dev/ttyUSB0`
    pub name: String,
    /// USB vendor ID
    pub vid: Option<u16>,
    /// USB product ID
    pub pid: Option<u16>,
    /// USB product string
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        Self {
            name,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            _ => Self::bare(info.port_name),
        }
    }
}

/// USB serial adapters sort before CDC devices, which sort before the rest
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum PortRank {
    UsbSerial(usize),
    Cdc(usize),
    Other(String),
}

fn rank(name: &str) -> PortRank {
    let device = name.rsplit('/').next().unwrap_or(name);
    let number = |digits: &str| digits.parse().unwrap_or(usize::MAX);
    if let Some(digits) = device.strip_prefix("ttyUSB") {
        PortRank::UsbSerial(number(digits))
    } else if let Some(digits) = device.strip_prefix("ttyACM") {
        PortRank::Cdc(number(digits))
    } else {
        PortRank::Other(device.to_string())
    }
}

/// Ports that could carry the bus, most likely adapter first
pub fn list_ports() -> Vec<PortInfo> {
    let mut found: BTreeMap<String, PortInfo> = serialport::available_ports()
        .unwrap_or_default()
        .into_iter()
        .map(|info| {
            let port = PortInfo::from(info);
            (port.name.clone(), port)
        })
        .collect();

    // adapters without udev metadata are missing from the enumeration
    #[cfg(target_os = "linux")]
    if let Ok(entries) = std::fs::read_dir("/dev") {
        for name in entries.flatten().filter_map(|e| e.file_name().into_string().ok()) {
            if matches!(rank(&name), PortRank::UsbSerial(_) | PortRank::Cdc(_)) {
                let path = format!("/dev/{name}");
                found.entry(path.clone()).or_insert_with(|| PortInfo::bare(path));
            }
        }
    }

    let mut ports: Vec<PortInfo> = found.into_values().collect();
    ports.sort_by_key(|p| rank(&p.name));
    ports
}

/// Open the bus on `name`; `None` uses 9600 baud
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<SerialStream, ProtocolError> {
    tokio_serial::new(name, baud_rate.unwrap_or(DEFAULT_BAUD_RATE))
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .open_native_async()
        .map_err(|e| match e.kind {
            tokio_serial::ErrorKind::NoDevice => ProtocolError::PortNotFound(name.to_string()),
            _ => ProtocolError::SerialError(e.to_string()),
        })
}
