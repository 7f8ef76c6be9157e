//! All Button panel driven through the link

use std::sync::Arc;

use aqualink_core::panel::{AllButtonPanel, MasterPanel, Panel};
use aqualink_core::pool::{EquipmentKind, EquipmentState, Pool};
use aqualink_core::protocol::{Frame, FrameCodec, LinkConfig, LinkReader};
use futures::{SinkExt, StreamExt};
use tokio::io::{duplex, DuplexStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const PANEL: u8 = 0x09;

fn text(line: u8, text: &str) -> Vec<u8> {
    let mut args = vec![line];
    let mut bytes: Vec<u8> = text
        .chars()
        .map(|c| if c == '°' { 0xdf } else { c as u8 })
        .collect();
    bytes.resize(16, b' ');
    args.extend(bytes);
    args
}

struct Harness {
    bus: Framed<DuplexStream, FrameCodec>,
    pool: Arc<Pool>,
    panel: Arc<AllButtonPanel>,
    shutdown: CancellationToken,
}

fn harness(config: LinkConfig) -> Harness {
    let pool = Arc::new(Pool::new(None, 1));
    let panel = Arc::new(AllButtonPanel::new(PANEL, pool.clone()));
    let (bus, link) = duplex(1024);
    let shutdown = CancellationToken::new();
    let reader = LinkReader::new(link, [panel.clone() as Arc<dyn Panel>], config)
        .with_master(Arc::new(MasterPanel::new(config.master_address)));
    tokio::spawn(reader.run(shutdown.clone()));
    Harness {
        bus: Framed::new(bus, FrameCodec::new()),
        pool,
        panel,
        shutdown,
    }
}

impl Harness {
    /// Send a frame to the panel and return its acknowledgment
    async fn exchange(&mut self, command: u8, args: Vec<u8>) -> Frame {
        self.bus.send(Frame::new(PANEL, command, args)).await.unwrap();
        self.bus.next().await.unwrap().unwrap()
    }
}

#[tokio::test]
async fn test_controller_session() {
    let mut h = harness(LinkConfig::default());

    let ack = h.exchange(0x00, vec![]).await;
    assert_eq!(ack, Frame::new(0x00, 0x01, vec![0x00, 0x00]));

    for line in [
        "B0029221 REV MMM",
        "BACKYARD",
        "05/12/14 MON",
        "10:32 AM",
        "POOL TEMP 81°F",
        "AIR TEMP 72°F",
    ] {
        h.exchange(0x03, text(0, line)).await;
    }
    // pump and pool heat enabled
    h.exchange(0x02, vec![0x00, 0x10, 0x00, 0x20, 0x00]).await;

    let snapshot = h.pool.snapshot();
    assert_eq!(snapshot.identity.model, "B0029221");
    assert_eq!(snapshot.identity.title, "BACKYARD");
    assert_eq!(snapshot.environment.pool_temp, 81);
    assert_eq!(snapshot.environment.air_temp, 72);
    assert_eq!(snapshot.environment.temp_scale, "F");
    assert_eq!(snapshot.equipment_state(EquipmentKind::Pump), Some(EquipmentState::On));
    assert_eq!(snapshot.equipment_state(EquipmentKind::Heater), Some(EquipmentState::Enabled));
    assert_eq!(snapshot.equipment_state(EquipmentKind::Spa), Some(EquipmentState::Off));

    h.shutdown.cancel();
}

#[tokio::test]
async fn test_pending_button_is_acknowledged() {
    let mut h = harness(LinkConfig::default());
    let pump = h
        .panel
        .binding_for(EquipmentKind::Pump, EquipmentState::On)
        .unwrap()
        .steps()[0]
        .button();
    h.panel.core().set_pending_button(pump);

    assert_eq!(h.exchange(0x00, vec![]).await.args, vec![0x00, 0x02]);
    assert_eq!(h.exchange(0x00, vec![]).await.args, vec![0x00, 0x00]);
    h.shutdown.cancel();
}

#[tokio::test]
async fn test_wrong_length_frame_is_acknowledged_but_ignored() {
    let mut h = harness(LinkConfig::default());
    let ack = h.exchange(0x02, vec![0xff, 0xff]).await;
    assert_eq!(ack.command, 0x01);
    assert_eq!(h.pool.equipment(EquipmentKind::Pump).state(), EquipmentState::Off);
    h.shutdown.cancel();
}

#[tokio::test]
async fn test_monitor_mode_decodes_without_sending() {
    let mut h = harness(LinkConfig {
        monitor_mode: true,
        ..Default::default()
    });
    h.panel.core().set_pending_button(aqualink_core::panel::Button::new("spa", 0x01));

    h.bus
        .send(Frame::new(PANEL, 0x02, vec![0x00, 0x04, 0x00, 0x00, 0x00]))
        .await
        .unwrap();
    // a frame for another device, then a reply to the controller
    h.bus.send(Frame::new(0x40, 0x00, vec![])).await.unwrap();
    h.bus.send(Frame::new(0x00, 0x01, vec![0x00, 0x00])).await.unwrap();

    let nothing = tokio::time::timeout(std::time::Duration::from_millis(100), h.bus.next()).await;
    assert!(nothing.is_err(), "monitor mode must not transmit");
    assert_eq!(h.pool.equipment(EquipmentKind::Spa).state(), EquipmentState::On);
    // the press stays queued
    assert_eq!(h.panel.core().pending_button(), 0x01);
    h.shutdown.cancel();
}

#[tokio::test]
async fn test_temperature_lines() {
    let mut h = harness(LinkConfig::default());
    // the model line comes first after start-up
    h.exchange(0x03, text(0, "B0029221 REV MMM")).await;
    for line in ["AIR TEMP 76°F", "POOL TEMP 81°F", "SPA TEMP 98°F"] {
        h.exchange(0x04, text(0, line)).await;
    }

    let env = h.pool.environment();
    assert_eq!((env.air_temp, env.pool_temp, env.spa_temp), (76, 81, 98));
    assert_eq!(env.temp_scale, "F");
    h.shutdown.cancel();
}

#[tokio::test]
async fn test_spa_status_changes_only_spa() {
    let mut h = harness(LinkConfig::default());
    h.exchange(0x02, vec![0x00, 0x04, 0x00, 0x00, 0x00]).await;

    for binding in h.panel.bindings() {
        let spa = binding.kind() == EquipmentKind::Spa;
        assert_eq!(binding.signal().is_set(), spa, "{}", binding.button());
    }
    let snapshot = h.pool.snapshot();
    for equipment in &snapshot.equipment {
        let expected = if equipment.kind == EquipmentKind::Spa {
            EquipmentState::On
        } else {
            EquipmentState::Off
        };
        assert_eq!(equipment.state, expected, "{}", equipment.name);
    }
    h.shutdown.cancel();
}
