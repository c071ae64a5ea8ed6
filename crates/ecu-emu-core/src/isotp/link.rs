//! ISO-TP link: one receive and one transmit state machine sharing a bus.
//!
//! Nothing in here blocks. Timers are checked against the `now_ms` passed to
//! [`IsoTpLink::poll`], and pacing that is not yet due is simply retried on the
//! next call.

use tracing::{debug, warn};

use super::pdu::{
    self, FlowStatus, Pdu, CONSECUTIVE_FRAME_DATA, FIRST_FRAME_DATA, MAX_PAYLOAD_LEN,
    SINGLE_FRAME_MAX,
};
use crate::error::TransportError;
use crate::faults::FaultInjector;
use crate::frame::{CanFrame, FrameSink};

/// Inactivity bound for both reassembly and flow-control waits.
pub const TRANSFER_TIMEOUT_MS: u64 = 1000;

/// A fully reassembled inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsoTpMessage {
    /// CAN id the message arrived on.
    pub id: u32,
    pub extended: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    Idle,
    WaitingForConsecutiveFrame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    WaitingForFlowControl,
    SendingConsecutiveFrames,
}

/// Id to answer a request on.
///
/// 11-bit: request id + 8. 29-bit: source and target address bytes swapped,
/// priority and format bits kept.
pub fn reply_id(id: u32, extended: bool) -> u32 {
    if extended {
        let target = (id >> 8) & 0xFF;
        let source = id & 0xFF;
        (id & 0x1FFF_0000) | (source << 8) | target
    } else {
        id + 8
    }
}

#[derive(Debug)]
struct RxChannel {
    state: RxState,
    source_id: u32,
    extended: bool,
    expected_len: usize,
    buffer: Vec<u8>,
    next_sequence: u8,
    last_activity_ms: u64,
}

impl RxChannel {
    fn new() -> Self {
        Self {
            state: RxState::Idle,
            source_id: 0,
            extended: false,
            expected_len: 0,
            buffer: Vec::new(),
            next_sequence: 1,
            last_activity_ms: 0,
        }
    }

    fn reset(&mut self) {
        self.state = RxState::Idle;
        self.expected_len = 0;
        self.buffer.clear();
        self.next_sequence = 1;
    }
}

#[derive(Debug)]
struct TxChannel {
    state: TxState,
    dest_id: u32,
    extended: bool,
    payload: Vec<u8>,
    offset: usize,
    sequence: u8,
    block_size: u8,
    frames_in_block: u8,
    st_min_ms: u64,
    timer_ms: u64,
    next_frame_due_ms: u64,
}

impl TxChannel {
    fn new() -> Self {
        Self {
            state: TxState::Idle,
            dest_id: 0,
            extended: false,
            payload: Vec::new(),
            offset: 0,
            sequence: 1,
            block_size: 0,
            frames_in_block: 0,
            st_min_ms: 0,
            timer_ms: 0,
            next_frame_due_ms: 0,
        }
    }

    fn reset(&mut self) {
        self.state = TxState::Idle;
        self.payload.clear();
        self.offset = 0;
        self.sequence = 1;
        self.block_size = 0;
        self.frames_in_block = 0;
        self.st_min_ms = 0;
    }
}

/// Transport context shared by all emulated ECUs: one reassembly and one
/// segmented transmission at a time.
#[derive(Debug)]
pub struct IsoTpLink {
    rx: RxChannel,
    tx: TxChannel,
    ready: Option<IsoTpMessage>,
}

impl IsoTpLink {
    pub fn new() -> Self {
        Self {
            rx: RxChannel::new(),
            tx: TxChannel::new(),
            ready: None,
        }
    }

    pub fn rx_state(&self) -> RxState {
        self.rx.state
    }

    pub fn tx_state(&self) -> TxState {
        self.tx.state
    }

    pub fn is_tx_idle(&self) -> bool {
        self.tx.state == TxState::Idle
    }

    /// Drop any in-flight transfer in both directions.
    pub fn reset(&mut self) {
        self.rx.reset();
        self.tx.reset();
        self.ready = None;
    }

    /// Take the reassembled message, if one is ready.
    pub fn take_message(&mut self) -> Option<IsoTpMessage> {
        self.ready.take()
    }

    /// Feed one inbound frame.
    pub fn on_frame(
        &mut self,
        frame: &CanFrame,
        now_ms: u64,
        faults: &FaultInjector,
        sink: &mut dyn FrameSink,
    ) {
        let pdu = match pdu::decode(frame.data()) {
            Ok(pdu) => pdu,
            Err(pdu::FramingError::InvalidFlowStatus(status))
                if self.tx.state == TxState::WaitingForFlowControl =>
            {
                warn!(status, "Reserved flow status, aborting transmission");
                self.tx.reset();
                return;
            }
            Err(e) => {
                debug!(id = format!("0x{:X}", frame.id()), error = %e, "Discarding frame");
                return;
            }
        };

        match pdu {
            Pdu::SingleFrame { data } => {
                if self.rx.state != RxState::Idle {
                    debug!("Single frame interrupts reception");
                    self.rx.reset();
                }
                self.deliver(IsoTpMessage {
                    id: frame.id(),
                    extended: frame.is_extended(),
                    payload: data.to_vec(),
                });
            }
            Pdu::FirstFrame { len, data } => {
                self.on_first_frame(frame, len as usize, data, now_ms, faults, sink);
            }
            Pdu::ConsecutiveFrame { sn, data } => {
                self.on_consecutive_frame(frame, sn, data, now_ms);
            }
            Pdu::FlowControl {
                status,
                block_size,
                st_min,
            } => self.on_flow_control(status, block_size, st_min, now_ms),
        }
    }

    fn on_first_frame(
        &mut self,
        frame: &CanFrame,
        len: usize,
        data: &[u8],
        now_ms: u64,
        faults: &FaultInjector,
        sink: &mut dyn FrameSink,
    ) {
        if self.rx.state != RxState::Idle {
            debug!("First frame restarts reception");
        }
        self.rx.reset();

        let first = data.len().min(FIRST_FRAME_DATA).min(len);
        self.rx.buffer.reserve(len);
        self.rx.buffer.extend_from_slice(&data[..first]);
        self.rx.source_id = frame.id();
        self.rx.extended = frame.is_extended();
        self.rx.expected_len = len;
        self.rx.next_sequence = 1;
        self.rx.last_activity_ms = now_ms;
        self.rx.state = RxState::WaitingForConsecutiveFrame;

        let status = faults.flow_status_for_first_frame();
        debug!(
            id = format!("0x{:X}", frame.id()),
            len,
            ?status,
            "First frame received"
        );
        let fc = Pdu::FlowControl {
            status,
            block_size: 0,
            st_min: 0,
        };
        emit(
            sink,
            reply_id(frame.id(), frame.is_extended()),
            frame.is_extended(),
            &fc,
        );
    }

    fn on_consecutive_frame(&mut self, frame: &CanFrame, sn: u8, data: &[u8], now_ms: u64) {
        if self.rx.state != RxState::WaitingForConsecutiveFrame {
            debug!(sn, "Unexpected consecutive frame ignored");
            return;
        }
        if frame.id() != self.rx.source_id || frame.is_extended() != self.rx.extended {
            warn!(
                expected = format!("0x{:X}", self.rx.source_id),
                got = format!("0x{:X}", frame.id()),
                "Consecutive frame from wrong source, reception aborted"
            );
            self.rx.reset();
            return;
        }
        if sn != self.rx.next_sequence {
            warn!(
                expected = self.rx.next_sequence,
                got = sn,
                "Wrong sequence number, reception aborted"
            );
            self.rx.reset();
            return;
        }

        let remaining = self.rx.expected_len.saturating_sub(self.rx.buffer.len());
        let take = remaining.min(CONSECUTIVE_FRAME_DATA).min(data.len());
        self.rx.buffer.extend_from_slice(&data[..take]);
        self.rx.next_sequence = (self.rx.next_sequence + 1) & 0x0F;
        self.rx.last_activity_ms = now_ms;

        if self.rx.buffer.len() >= self.rx.expected_len {
            let payload = std::mem::take(&mut self.rx.buffer);
            let message = IsoTpMessage {
                id: self.rx.source_id,
                extended: self.rx.extended,
                payload,
            };
            self.rx.reset();
            self.deliver(message);
        }
    }

    fn on_flow_control(&mut self, status: FlowStatus, block_size: u8, st_min: u8, now_ms: u64) {
        if self.tx.state != TxState::WaitingForFlowControl {
            debug!(?status, "Flow control without pending transmission ignored");
            return;
        }

        match status {
            FlowStatus::ContinueToSend => {
                self.tx.block_size = block_size;
                self.tx.frames_in_block = 0;
                self.tx.st_min_ms = pdu::st_min_to_ms(st_min);
                self.tx.next_frame_due_ms = now_ms;
                self.tx.state = TxState::SendingConsecutiveFrames;
                debug!(block_size, st_min_ms = self.tx.st_min_ms, "Clear to send");
            }
            FlowStatus::Wait => {
                self.tx.timer_ms = now_ms;
            }
            FlowStatus::Overflow => {
                warn!("Receiver overflow, aborting transmission");
                self.tx.reset();
            }
        }
    }

    fn deliver(&mut self, message: IsoTpMessage) {
        if self.ready.is_some() {
            debug!("Unconsumed message replaced");
        }
        self.ready = Some(message);
    }

    /// Advance timers and emit at most one due consecutive frame.
    pub fn poll(&mut self, now_ms: u64, faults: &mut FaultInjector, sink: &mut dyn FrameSink) {
        if self.rx.state == RxState::WaitingForConsecutiveFrame
            && now_ms.saturating_sub(self.rx.last_activity_ms) > TRANSFER_TIMEOUT_MS
        {
            warn!(
                received = self.rx.buffer.len(),
                expected = self.rx.expected_len,
                "Reception timed out"
            );
            self.rx.reset();
        }

        match self.tx.state {
            TxState::Idle => {}
            TxState::WaitingForFlowControl => {
                if now_ms.saturating_sub(self.tx.timer_ms) > TRANSFER_TIMEOUT_MS {
                    warn!("No flow control received, transmission aborted");
                    self.tx.reset();
                }
            }
            TxState::SendingConsecutiveFrames => {
                if now_ms >= self.tx.next_frame_due_ms {
                    self.send_consecutive_frame(now_ms, faults, sink);
                }
            }
        }
    }

    fn send_consecutive_frame(
        &mut self,
        now_ms: u64,
        faults: &mut FaultInjector,
        sink: &mut dyn FrameSink,
    ) {
        let end = (self.tx.offset + CONSECUTIVE_FRAME_DATA).min(self.tx.payload.len());
        let sn = faults.sequence_number(self.tx.sequence);
        let cf = Pdu::ConsecutiveFrame {
            sn,
            data: &self.tx.payload[self.tx.offset..end],
        };
        emit(sink, self.tx.dest_id, self.tx.extended, &cf);

        self.tx.offset = end;
        self.tx.sequence = (self.tx.sequence + 1) & 0x0F;

        if self.tx.offset >= self.tx.payload.len() {
            debug!(len = self.tx.payload.len(), "Transmission complete");
            self.tx.reset();
            return;
        }
        if faults.abort_after_first_consecutive_frame() {
            warn!(
                sent = self.tx.offset,
                total = self.tx.payload.len(),
                "Injected partial transfer, aborting"
            );
            self.tx.reset();
            return;
        }

        if self.tx.block_size > 0 {
            self.tx.frames_in_block += 1;
            if self.tx.frames_in_block >= self.tx.block_size {
                self.tx.frames_in_block = 0;
                self.tx.timer_ms = now_ms;
                self.tx.state = TxState::WaitingForFlowControl;
                return;
            }
        }
        self.tx.next_frame_due_ms = now_ms + faults.separation_time_ms(self.tx.st_min_ms);
    }

    /// Start transmitting `payload` to `id`.
    ///
    /// Payloads of up to 7 bytes leave immediately as a single frame; larger
    /// ones send a first frame and continue from [`IsoTpLink::poll`] once flow
    /// control arrives. A send while a transmission is in progress is
    /// rejected.
    pub fn send(
        &mut self,
        id: u32,
        extended: bool,
        payload: &[u8],
        now_ms: u64,
        sink: &mut dyn FrameSink,
    ) -> Result<(), TransportError> {
        if self.tx.state != TxState::Idle {
            return Err(TransportError::Busy);
        }
        if payload.is_empty() {
            return Err(TransportError::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD_LEN {
            return Err(TransportError::PayloadTooLarge(payload.len()));
        }
        if CanFrame::new(id, extended, &[]).is_none() {
            return Err(TransportError::InvalidId(id));
        }

        if payload.len() <= SINGLE_FRAME_MAX {
            emit(sink, id, extended, &Pdu::SingleFrame { data: payload });
            return Ok(());
        }

        let ff = Pdu::FirstFrame {
            len: payload.len() as u16,
            data: &payload[..FIRST_FRAME_DATA],
        };
        emit(sink, id, extended, &ff);

        self.tx.dest_id = id;
        self.tx.extended = extended;
        self.tx.payload = payload.to_vec();
        self.tx.offset = FIRST_FRAME_DATA;
        self.tx.sequence = 1;
        self.tx.frames_in_block = 0;
        self.tx.timer_ms = now_ms;
        self.tx.state = TxState::WaitingForFlowControl;
        Ok(())
    }
}

impl Default for IsoTpLink {
    fn default() -> Self {
        Self::new()
    }
}

fn emit(sink: &mut dyn FrameSink, id: u32, extended: bool, pdu: &Pdu<'_>) {
    let bytes = match pdu::encode(pdu) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "Failed to encode frame");
            return;
        }
    };
    match CanFrame::new(id, extended, &bytes) {
        Some(frame) => sink.emit(frame),
        None => warn!(id = format!("0x{:X}", id), "Reply id out of range, frame dropped"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::faults::FaultSettings;
    use pretty_assertions::assert_eq;

    fn frame(id: u32, data: &[u8]) -> CanFrame {
        CanFrame::new(id, id > 0x7FF, data).unwrap()
    }

    fn faults() -> FaultInjector {
        FaultInjector::with_seed(FaultSettings::default(), 0)
    }

    #[test]
    fn reply_ids() {
        assert_eq!(reply_id(0x7E0, false), 0x7E8);
        assert_eq!(reply_id(0x7E8, false), 0x7F0);
        assert_eq!(reply_id(0x18DA_10F1, true), 0x18DA_F110);
        assert_eq!(reply_id(0x18DA_F118, true), 0x18DA_18F1);
    }

    #[test]
    fn single_frame_is_ready_immediately() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.on_frame(&frame(0x7DF, &[0x02, 0x01, 0x0C, 0xAA]), 0, &faults(), &mut out);

        assert!(out.is_empty());
        assert_eq!(link.rx_state(), RxState::Idle);
        let msg = link.take_message().unwrap();
        assert_eq!(msg.payload, vec![0x01, 0x0C]);
        assert_eq!(msg.id, 0x7DF);
        assert!(link.take_message().is_none());
    }

    #[test]
    fn first_frame_answers_continue_to_send() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.on_frame(
            &frame(0x18DA_10F1, &[0x10, 0x0A, 1, 2, 3, 4, 5, 6]),
            0,
            &faults(),
            &mut out,
        );

        assert_eq!(link.rx_state(), RxState::WaitingForConsecutiveFrame);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id(), 0x18DA_F110);
        assert!(out[0].is_extended());
        assert_eq!(&out[0].data()[..3], &[0x30, 0x00, 0x00]);

        link.on_frame(&frame(0x18DA_10F1, &[0x21, 7, 8, 9, 10, 0xAA, 0xAA, 0xAA]), 5, &faults(), &mut out);
        let msg = link.take_message().unwrap();
        assert_eq!(msg.payload, (1..=10).collect::<Vec<u8>>());
        assert_eq!(link.rx_state(), RxState::Idle);
    }

    #[test]
    fn wrong_sequence_discards_reception() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.on_frame(&frame(0x7E0, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]), 0, &faults(), &mut out);
        link.on_frame(&frame(0x7E0, &[0x22, 7, 8, 9, 10, 11, 12, 13]), 1, &faults(), &mut out);

        assert_eq!(link.rx_state(), RxState::Idle);
        assert!(link.take_message().is_none());

        // The rest of the old transfer is ignored.
        link.on_frame(&frame(0x7E0, &[0x23, 1, 2, 3, 4, 5, 6, 7]), 2, &faults(), &mut out);
        assert!(link.take_message().is_none());
    }

    #[test]
    fn wrong_source_discards_reception() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.on_frame(&frame(0x7E0, &[0x10, 0x09, 1, 2, 3, 4, 5, 6]), 0, &faults(), &mut out);
        link.on_frame(&frame(0x7E1, &[0x21, 7, 8, 9]), 1, &faults(), &mut out);

        assert_eq!(link.rx_state(), RxState::Idle);
        assert!(link.take_message().is_none());
    }

    #[test]
    fn reception_times_out() {
        let mut link = IsoTpLink::new();
        let mut faults = faults();
        let mut out = Vec::new();
        link.on_frame(&frame(0x7E0, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]), 0, &faults, &mut out);

        link.poll(TRANSFER_TIMEOUT_MS, &mut faults, &mut out);
        assert_eq!(link.rx_state(), RxState::WaitingForConsecutiveFrame);

        link.poll(TRANSFER_TIMEOUT_MS + 1, &mut faults, &mut out);
        assert_eq!(link.rx_state(), RxState::Idle);
    }

    #[test]
    fn short_payload_sends_single_frame() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0x41, 0x0D, 0x3C], 0, &mut out).unwrap();

        assert_eq!(link.tx_state(), TxState::Idle);
        assert_eq!(out[0].data(), &[0x03, 0x41, 0x0D, 0x3C, 0xAA, 0xAA, 0xAA, 0xAA]);
    }

    #[test]
    fn send_rejected_while_busy() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 20], 0, &mut out).unwrap();
        assert_eq!(link.tx_state(), TxState::WaitingForFlowControl);
        assert_eq!(
            link.send(0x7E8, false, &[1, 2], 0, &mut out),
            Err(TransportError::Busy)
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn send_rejects_bad_payloads() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        assert_eq!(
            link.send(0x7E8, false, &[], 0, &mut out),
            Err(TransportError::EmptyPayload)
        );
        assert_eq!(
            link.send(0x7E8, false, &vec![0u8; 4096], 0, &mut out),
            Err(TransportError::PayloadTooLarge(4096))
        );
        assert_eq!(
            link.send(0x800, false, &[1], 0, &mut out),
            Err(TransportError::InvalidId(0x800))
        );
        assert!(out.is_empty());
    }

    #[test]
    fn flow_control_wait_timer_and_timeout() {
        let mut link = IsoTpLink::new();
        let mut faults = faults();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 20], 0, &mut out).unwrap();

        link.on_frame(&frame(0x7E0, &[0x31, 0, 0]), 900, &faults, &mut out);
        link.poll(1500, &mut faults, &mut out);
        assert_eq!(link.tx_state(), TxState::WaitingForFlowControl);

        link.poll(1901, &mut faults, &mut out);
        assert_eq!(link.tx_state(), TxState::Idle);
    }

    #[test]
    fn overflow_aborts_transmission() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 20], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x32, 0, 0]), 1, &faults(), &mut out);
        assert_eq!(link.tx_state(), TxState::Idle);
    }

    #[test]
    fn reserved_flow_status_aborts_transmission() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 20], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x3F, 0, 0]), 1, &faults(), &mut out);
        assert_eq!(link.tx_state(), TxState::Idle);
    }

    #[test]
    fn st_min_paces_consecutive_frames() {
        let mut link = IsoTpLink::new();
        let mut faults = faults();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 30], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x30, 0x00, 0x0A]), 0, &faults, &mut out);
        out.clear();

        link.poll(0, &mut faults, &mut out);
        assert_eq!(out.len(), 1);
        link.poll(9, &mut faults, &mut out);
        assert_eq!(out.len(), 1, "second frame not due before STmin");
        link.poll(10, &mut faults, &mut out);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn block_size_pauses_for_flow_control() {
        let mut link = IsoTpLink::new();
        let mut faults = faults();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 40], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x30, 0x02, 0x00]), 0, &faults, &mut out);
        out.clear();

        for now in 0..5 {
            link.poll(now, &mut faults, &mut out);
        }
        assert_eq!(out.len(), 2);
        assert_eq!(link.tx_state(), TxState::WaitingForFlowControl);

        link.on_frame(&frame(0x7E0, &[0x30, 0x02, 0x00]), 5, &faults, &mut out);
        for now in 5..10 {
            link.poll(now, &mut faults, &mut out);
        }
        assert_eq!(out.len(), 4);
        assert_eq!(out[2].data()[0], 0x23);
    }

    #[test]
    fn sequence_numbers_wrap_modulo_16() {
        let mut link = IsoTpLink::new();
        let mut faults = faults();
        let mut out = Vec::new();
        let payload = vec![0x55u8; 6 + 7 * 20];
        link.send(0x7E8, false, &payload, 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x30, 0x00, 0x00]), 0, &faults, &mut out);
        out.clear();

        for now in 0..40 {
            link.poll(now, &mut faults, &mut out);
        }
        let sequence: Vec<u8> = out.iter().map(|f| f.data()[0] & 0x0F).collect();
        let expected: Vec<u8> = (1..=20u8).map(|i| i & 0x0F).collect();
        assert_eq!(sequence, expected);
        assert!(out.iter().all(|f| f.dlc() == 8));
    }

    #[test]
    fn partial_transfer_fault_stops_after_first_frame() {
        let mut link = IsoTpLink::new();
        let mut faults = FaultInjector::with_seed(
            FaultSettings {
                partial_transfer: true,
                ..Default::default()
            },
            0,
        );
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 40], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x30, 0x00, 0x00]), 0, &faults, &mut out);
        out.clear();

        for now in 0..10 {
            link.poll(now, &mut faults, &mut out);
        }
        assert_eq!(out.len(), 1);
        assert_eq!(link.tx_state(), TxState::Idle);
    }

    #[test]
    fn ignore_st_min_fault_sends_back_to_back() {
        let mut link = IsoTpLink::new();
        let mut faults = FaultInjector::with_seed(
            FaultSettings {
                ignore_st_min: true,
                ..Default::default()
            },
            0,
        );
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 30], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x30, 0x00, 0x7F]), 0, &faults, &mut out);
        out.clear();

        for _ in 0..4 {
            link.poll(0, &mut faults, &mut out);
        }
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn reset_abandons_transfers() {
        let mut link = IsoTpLink::new();
        let mut out = Vec::new();
        link.send(0x7E8, false, &[0u8; 20], 0, &mut out).unwrap();
        link.on_frame(&frame(0x7E0, &[0x10, 0x14, 1, 2, 3, 4, 5, 6]), 0, &faults(), &mut out);

        link.reset();
        assert_eq!(link.tx_state(), TxState::Idle);
        assert_eq!(link.rx_state(), RxState::Idle);
    }
}
