//! Event printer: one JSON object per line on stdout.

use std::collections::HashMap;

use serde_json::{Value, json};
use tokio::sync::broadcast::{self, error::RecvError};

use gattlink_domain::codec::DecodedValue;
use gattlink_domain::event::Event;
use gattlink_domain::frame::FrameLayout;
use gattlink_domain::gatt::CharacteristicRef;

use crate::config::Config;

/// Renders events, unpacking raw values of characteristics configured with a frame.
#[derive(Debug, Default)]
pub struct Printer {
    frames: HashMap<CharacteristicRef, FrameLayout>,
}

impl Printer {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let frames = config
            .read
            .iter()
            .chain(&config.subscribe)
            .filter_map(|job| Some((job.reference(), job.frame?.layout())))
            .collect();
        Self { frames }
    }

    /// Render an event as a JSON object tagged with its name.
    #[must_use]
    pub fn render(&self, event: &Event) -> Value {
        let mut rendered = render(event);
        if let Event::ValueRead {
            characteristic,
            value: DecodedValue::Bytes(raw),
            ..
        }
        | Event::ValueChanged {
            characteristic,
            value: DecodedValue::Bytes(raw),
            ..
        } = event
            && let Some(layout) = self.frames.get(characteristic)
        {
            rendered["frame"] = match layout.decode(raw) {
                Ok(fields) => json!(fields),
                Err(err) => json!({ "error": err.to_string() }),
            };
        }
        rendered
    }
}

fn render(event: &Event) -> Value {
    let name = event.name();
    match event {
        Event::DeviceFound { peripheral } => json!({
            "event": name,
            "address": peripheral.address,
            "name": peripheral.name,
            "signal_strength": peripheral.signal_strength,
            "first_seen": peripheral.first_seen.to_rfc3339(),
        }),
        Event::SignalStrengthChanged {
            address,
            signal_strength,
        } => json!({
            "event": name,
            "address": address,
            "signal_strength": signal_strength,
        }),
        Event::Connected { address } | Event::Disconnected { address } => json!({
            "event": name,
            "address": address,
        }),
        Event::ServicesDiscovered {
            address,
            service_count,
        } => json!({
            "event": name,
            "address": address,
            "service_count": service_count,
        }),
        Event::ValueRead {
            address,
            characteristic,
            value,
        }
        | Event::ValueChanged {
            address,
            characteristic,
            value,
        } => json!({
            "event": name,
            "address": address,
            "characteristic": characteristic,
            "value": value,
            "text": value.to_string(),
        }),
        Event::ValueWritten {
            address,
            characteristic,
        } => json!({
            "event": name,
            "address": address,
            "characteristic": characteristic,
        }),
        Event::Failure {
            address,
            operation,
            error,
        } => json!({
            "event": name,
            "address": address,
            "operation": operation.name(),
            "characteristic": operation.characteristic(),
            "error": error.to_string(),
        }),
    }
}

/// Print every event until the bus closes.
pub async fn print_events(printer: Printer, mut events: broadcast::Receiver<Event>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", printer.render(&event)),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event printer fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gattlink_domain::codec::ValueFormat;
    use gattlink_domain::error::GattError;
    use gattlink_domain::event::Operation;
    use gattlink_domain::frame::FrameKind;
    use gattlink_domain::peripheral::Peripheral;
    use uuid::Uuid;

    use crate::config::CharacteristicJob;

    fn motion() -> CharacteristicRef {
        CharacteristicRef::new(Uuid::from_u128(0xA0), Uuid::from_u128(0xA1))
    }

    fn frame_printer() -> Printer {
        let mut config = Config::default();
        config.subscribe.push(CharacteristicJob {
            service: Uuid::from_u128(0xA0),
            characteristic: Uuid::from_u128(0xA1),
            format: ValueFormat::Bytes,
            offset: 0,
            frame: Some(FrameKind::MultiSensorTag),
        });
        Printer::new(&config)
    }

    #[test]
    fn should_render_decoded_read() {
        let event = Event::ValueRead {
            address: "AA:01".into(),
            characteristic: CharacteristicRef::new(Uuid::from_u128(0x180F), Uuid::from_u128(0x2A19)),
            value: DecodedValue::Int(87),
        };
        let rendered = render(&event);
        assert_eq!(rendered["event"], "IntValueRead");
        assert_eq!(rendered["address"], "AA:01");
        assert_eq!(rendered["value"]["value"], 87);
        assert_eq!(rendered["text"], "87");
    }

    #[test]
    fn should_render_found_device_with_sighting_time() {
        let peripheral = Peripheral::sighted("AA:01".into(), Some("Sensor1".to_string()), -42);
        let rendered = render(&Event::DeviceFound {
            peripheral: peripheral.clone(),
        });
        assert_eq!(rendered["event"], "DeviceFound");
        assert_eq!(rendered["name"], "Sensor1");
        assert_eq!(rendered["signal_strength"], -42);
        assert_eq!(rendered["first_seen"], peripheral.first_seen.to_rfc3339());
    }

    #[test]
    fn should_render_failure_without_address() {
        let event = Event::Failure {
            address: None,
            operation: Operation::Scan,
            error: GattError::ConnectionLost,
        };
        let rendered = render(&event);
        assert_eq!(rendered["event"], "Failure");
        assert!(rendered["address"].is_null());
        assert_eq!(rendered["operation"], "scan");
        assert!(rendered["characteristic"].is_null());
        assert_eq!(rendered["error"], GattError::ConnectionLost.to_string());
    }

    #[test]
    fn should_render_failed_operation_with_its_characteristic() {
        let event = Event::Failure {
            address: Some("AA:01".into()),
            operation: Operation::Read(motion()),
            error: GattError::ConnectionLost,
        };
        let rendered = render(&event);
        assert_eq!(rendered["operation"], "read");
        assert_eq!(rendered["characteristic"], json!(motion()));
    }

    // ── Frames ──

    #[test]
    fn should_unpack_frame_of_configured_characteristic() {
        // humidity (0x04) + temperature (0x20)
        let event = Event::ValueChanged {
            address: "AA:01".into(),
            characteristic: motion(),
            value: DecodedValue::Bytes(vec![0x24, 0xC3, 0x01, 0xE1, 0x00]),
        };
        let rendered = frame_printer().render(&event);
        assert_eq!(rendered["text"], "36,195,1,225,0");
        assert_eq!(rendered["frame"][0]["name"], "humidity");
        assert_eq!(rendered["frame"][1]["name"], "temperature");
        assert_eq!(rendered["frame"][1]["values"], json!([22.5]));
    }

    #[test]
    fn should_report_truncated_frame_inline() {
        let event = Event::ValueRead {
            address: "AA:01".into(),
            characteristic: motion(),
            value: DecodedValue::Bytes(vec![0x20, 0xE1]),
        };
        let rendered = frame_printer().render(&event);
        assert!(rendered["frame"]["error"].is_string());
        assert_eq!(rendered["event"], "ByteValueRead");
    }

    #[test]
    fn should_leave_other_characteristics_unframed() {
        let event = Event::ValueChanged {
            address: "AA:01".into(),
            characteristic: CharacteristicRef::new(Uuid::from_u128(1), Uuid::from_u128(2)),
            value: DecodedValue::Bytes(vec![0x20, 0xE1, 0x00]),
        };
        let rendered = frame_printer().render(&event);
        assert!(rendered.get("frame").is_none());
    }

    #[test]
    fn should_render_bytes_as_comma_separated_text() {
        let event = Event::ValueChanged {
            address: "AA:01".into(),
            characteristic: CharacteristicRef::new(Uuid::from_u128(1), Uuid::from_u128(2)),
            value: DecodedValue::Bytes(vec![1, 255]),
        };
        let rendered = render(&event);
        assert_eq!(rendered["event"], "ByteValueChanged");
        assert_eq!(rendered["text"], "1,255");
    }
}
