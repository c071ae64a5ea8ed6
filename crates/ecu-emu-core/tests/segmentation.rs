//! Transport properties: segmentation round trip and sequence handling.

use ecu_emu_core::faults::FaultSettings;
use ecu_emu_core::isotp::pdu::{self, FlowStatus, Pdu};
use ecu_emu_core::isotp::{IsoTpLink, RxState, TxState};
use ecu_emu_core::{CanFrame, FaultInjector};
use pretty_assertions::assert_eq;
use rstest::rstest;

const SENDER_ID: u32 = 0x7E8;
const RECEIVER_ID: u32 = 0x7E0;

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 + 3) as u8).collect()
}

fn flow_control(block_size: u8, st_min: u8) -> CanFrame {
    let bytes = pdu::encode(&Pdu::FlowControl {
        status: FlowStatus::ContinueToSend,
        block_size,
        st_min,
    })
    .unwrap();
    CanFrame::new(RECEIVER_ID, false, &bytes).unwrap()
}

/// Send `data` from one link to another, answering every flow-control wait
/// with the given parameters. Returns the reassembled payload.
fn transfer(data: &[u8], block_size: u8, st_min: u8) -> Vec<u8> {
    let mut sender = IsoTpLink::new();
    let mut receiver = IsoTpLink::new();
    let mut faults = FaultInjector::with_seed(FaultSettings::default(), 0);
    let mut on_bus: Vec<CanFrame> = Vec::new();
    let mut receiver_replies: Vec<CanFrame> = Vec::new();
    let mut now = 0u64;

    sender
        .send(SENDER_ID, false, data, now, &mut on_bus)
        .unwrap();

    for _ in 0..200_000 {
        for frame in on_bus.drain(..) {
            receiver.on_frame(&frame, now, &faults, &mut receiver_replies);
        }
        receiver_replies.clear();

        if let Some(message) = receiver.take_message() {
            assert_eq!(message.id, SENDER_ID);
            assert_eq!(sender.tx_state(), TxState::Idle);
            return message.payload;
        }

        if sender.tx_state() == TxState::WaitingForFlowControl {
            sender.on_frame(&flow_control(block_size, st_min), now, &faults, &mut on_bus);
        }
        sender.poll(now, &mut faults, &mut on_bus);
        now += 1;
    }
    panic!("transfer of {} bytes did not complete", data.len());
}

#[rstest]
fn segmentation_round_trip(
    #[values(1, 7, 8, 13, 62, 256, 4095)] len: usize,
    #[values(0, 1, 8)] block_size: u8,
    #[values(0, 5, 127, 0xF3)] st_min: u8,
) {
    let data = payload(len);
    assert_eq!(transfer(&data, block_size, st_min), data);
}

fn consecutive_frame(sn: u8, data: &[u8]) -> CanFrame {
    let bytes = pdu::encode(&Pdu::ConsecutiveFrame { sn, data }).unwrap();
    CanFrame::new(RECEIVER_ID, false, &bytes).unwrap()
}

fn first_frame(len: u16, data: &[u8]) -> CanFrame {
    let bytes = pdu::encode(&Pdu::FirstFrame { len, data }).unwrap();
    CanFrame::new(RECEIVER_ID, false, &bytes).unwrap()
}

#[test]
fn sequence_numbers_wrap_modulo_16() {
    let data = payload(6 + 7 * 20);
    let mut sender = IsoTpLink::new();
    let mut faults = FaultInjector::with_seed(FaultSettings::default(), 0);
    let mut frames: Vec<CanFrame> = Vec::new();

    sender.send(SENDER_ID, false, &data, 0, &mut frames).unwrap();
    sender.on_frame(&flow_control(0, 0), 0, &faults, &mut frames);
    for _ in 0..20 {
        sender.poll(0, &mut faults, &mut frames);
    }

    let sequence: Vec<u8> = frames[1..].iter().map(|f| f.data()[0] & 0x0F).collect();
    let expected: Vec<u8> = (1..=20u8).map(|n| n % 16).collect();
    assert_eq!(sequence, expected);
}

#[test]
fn out_of_order_sequence_discards_reception() {
    let data = payload(30);
    let mut receiver = IsoTpLink::new();
    let faults = FaultInjector::default();
    let mut replies: Vec<CanFrame> = Vec::new();

    receiver.on_frame(&first_frame(30, &data[..6]), 0, &faults, &mut replies);
    receiver.on_frame(&consecutive_frame(1, &data[6..13]), 1, &faults, &mut replies);
    assert_eq!(receiver.rx_state(), RxState::WaitingForConsecutiveFrame);

    receiver.on_frame(&consecutive_frame(3, &data[13..20]), 2, &faults, &mut replies);
    assert_eq!(receiver.rx_state(), RxState::Idle);

    // The rest of the broken transfer is ignored.
    receiver.on_frame(&consecutive_frame(2, &data[13..20]), 3, &faults, &mut replies);
    receiver.on_frame(&consecutive_frame(3, &data[20..27]), 4, &faults, &mut replies);
    receiver.on_frame(&consecutive_frame(4, &data[27..30]), 5, &faults, &mut replies);
    assert_eq!(receiver.take_message(), None);
}

#[test]
fn injected_sequence_errors_are_caught_by_receiver() {
    let data = payload(500);
    let mut sender = IsoTpLink::new();
    let mut receiver = IsoTpLink::new();
    let mut faults = FaultInjector::with_seed(
        FaultSettings {
            incorrect_sequence: true,
            ..Default::default()
        },
        9,
    );
    let mut on_bus: Vec<CanFrame> = Vec::new();
    let mut replies: Vec<CanFrame> = Vec::new();

    sender.send(SENDER_ID, false, &data, 0, &mut on_bus).unwrap();
    sender.on_frame(&flow_control(0, 0), 0, &faults, &mut on_bus);
    while sender.tx_state() != TxState::Idle {
        sender.poll(0, &mut faults, &mut on_bus);
    }
    for frame in on_bus.drain(..) {
        receiver.on_frame(&frame, 0, &faults, &mut replies);
    }

    // With 71 consecutive frames and a 1-in-3 corruption rate, at least one
    // frame is off and the reception is discarded.
    assert_eq!(receiver.take_message(), None);
    assert_eq!(receiver.rx_state(), RxState::Idle);
}

#[test]
fn partial_transfer_fault_stops_after_first_consecutive_frame() {
    let data = payload(100);
    let mut sender = IsoTpLink::new();
    let mut faults = FaultInjector::with_seed(
        FaultSettings {
            partial_transfer: true,
            ..Default::default()
        },
        0,
    );
    let mut frames: Vec<CanFrame> = Vec::new();

    sender.send(SENDER_ID, false, &data, 0, &mut frames).unwrap();
    sender.on_frame(&flow_control(0, 0), 0, &faults, &mut frames);
    for now in 0..10 {
        sender.poll(now, &mut faults, &mut frames);
    }

    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].data()[0], 0x21);
    assert_eq!(sender.tx_state(), TxState::Idle);
}
