//! An in-memory service processor.
//!
//! [`SimulatedSp`] implements [`IpccOps`] by decoding each request frame as
//! it is written and queueing the framed reply for the next reads. It answers
//! the whole command catalogue from fixture data, raises its interrupt line
//! whenever its status register is non-zero, and can be told to misbehave in
//! the ways a real link does.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use bytes::{Buf, BufMut};
use ipcc_frame::command::{decode_failure, hss, key, sp, status};
use ipcc_frame::{
    cobs, computed_checksum, decode_header, encode_message, payload, stored_checksum, Header,
    MAGIC, MAX_MESSAGE_SIZE, MAX_PACKET_SIZE, MIN_MESSAGE_SIZE, SEQ_REPLY, SEQ_UNKNOWN,
    TERMINATOR, VERSION,
};
use ipcc_transport::{forward_to_tracing, IpccOps, PollEvents};
use tracing::Level;

use crate::types::{
    Ident, InventoryResult, KeyLookupResult, KeySetResult, MacBlock, IDENT_FIELD_LEN,
    IMAGE_HASH_LEN, INVENTORY_NAME_LEN,
};

/// Largest value the simulated key store accepts.
pub const KEY_VALUE_MAX: usize = 1024;
/// Most image bytes returned by one image-block reply.
pub const IMAGE_CHUNK: usize = 1024;

/// A misbehaviour applied to the reply to one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Flip the reply's checksum.
    CorruptChecksum,
    /// Send a reply for the previous sequence number before the real one.
    StaleSequence,
    /// Answer with a decode failure carrying the unknown-sequence sentinel.
    DecodeFailure,
    /// Answer with a decode failure carrying the request's sequence number.
    SequencedDecodeFailure,
    /// Send a frame whose COBS encoding is truncated instead of the reply.
    BrokenFraming,
    /// Swallow the request.
    Silence,
    /// Send an empty frame before the reply.
    KeepAliveFirst,
    /// Reply with the wrong command.
    WrongCommand,
    /// Append a byte to the reply payload.
    ExtraByte,
    /// Set status bits while handling the request.
    RaiseStatus(u64),
}

/// A request as the SP decoded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub sequence: u64,
    pub command: u8,
    pub payload: Vec<u8>,
}

/// One row of the simulated hardware inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub result: InventoryResult,
    pub name: String,
    pub kind: u8,
    pub data: Vec<u8>,
}

pub struct SimulatedSp {
    ident: Ident,
    macs: MacBlock,
    bsu: u8,
    status: u64,
    startup: u64,
    alerts: VecDeque<(u8, String)>,
    keys: BTreeMap<u8, Vec<u8>>,
    inventory: Vec<InventoryEntry>,
    image_hash: [u8; IMAGE_HASH_LEN],
    image: Vec<u8>,
    interrupt_line: bool,

    faults: VecDeque<Fault>,
    persistent: Option<Fault>,

    inbound: Vec<u8>,
    outbound: VecDeque<u8>,
    requests: Vec<Request>,
    frames: usize,
    keepalives: usize,
    logs: Vec<(Level, String)>,
}

impl Default for SimulatedSp {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSp {
    pub fn new() -> Self {
        Self {
            ident: Ident {
                model: "913-0000019".to_string(),
                revision: 6,
                serial: "BRM42220017".to_string(),
            },
            macs: MacBlock {
                base: [0xa8, 0x40, 0x25, 0x04, 0x01, 0x00],
                count: 8,
                stride: 1,
            },
            bsu: b'A',
            status: 0,
            startup: 0,
            alerts: VecDeque::new(),
            keys: BTreeMap::new(),
            inventory: vec![
                InventoryEntry {
                    result: InventoryResult::Success,
                    name: "U615/ID".to_string(),
                    kind: 1,
                    data: b"913-0000019".to_vec(),
                },
                InventoryEntry {
                    result: InventoryResult::DeviceAbsent,
                    name: "J206/FAN".to_string(),
                    kind: 0,
                    data: Vec::new(),
                },
            ],
            image_hash: [0xab; IMAGE_HASH_LEN],
            image: (0..4096u32).map(|i| (i % 251) as u8).collect(),
            interrupt_line: true,
            faults: VecDeque::new(),
            persistent: None,
            inbound: Vec::new(),
            outbound: VecDeque::new(),
            requests: Vec::new(),
            frames: 0,
            keepalives: 0,
            logs: Vec::new(),
        }
    }

    /// Sets the status register. The alert bit is derived from the alert
    /// queue and ignored here.
    pub fn with_status(mut self, bits: u64) -> Self {
        self.status = bits;
        self
    }

    pub fn with_startup(mut self, startup: u64) -> Self {
        self.startup = startup;
        self
    }

    /// Whether the interrupt line is wired to the status register.
    pub fn with_interrupt_line(mut self, wired: bool) -> Self {
        self.interrupt_line = wired;
        self
    }

    pub fn with_ident(mut self, ident: Ident) -> Self {
        self.ident = ident;
        self
    }

    pub fn with_macs(mut self, macs: MacBlock) -> Self {
        self.macs = macs;
        self
    }

    pub fn with_key(mut self, key: u8, value: impl Into<Vec<u8>>) -> Self {
        self.keys.insert(key, value.into());
        self
    }

    pub fn with_inventory(mut self, inventory: Vec<InventoryEntry>) -> Self {
        self.inventory = inventory;
        self
    }

    pub fn with_image(mut self, hash: [u8; IMAGE_HASH_LEN], image: Vec<u8>) -> Self {
        self.image_hash = hash;
        self.image = image;
        self
    }

    /// Queues an alert and, through the status register, raises the line.
    pub fn push_alert(&mut self, action: u8, message: &str) {
        self.alerts.push_back((action, message.to_string()));
    }

    pub fn raise_status(&mut self, bits: u64) {
        self.status |= bits;
    }

    /// Applies `fault` to the reply to the next request.
    pub fn inject(&mut self, fault: Fault) {
        self.faults.push_back(fault);
    }

    /// Applies `fault` to every reply once injected faults run out.
    pub fn always(&mut self, fault: Fault) {
        self.persistent = Some(fault);
    }

    pub fn clear_faults(&mut self) {
        self.faults.clear();
        self.persistent = None;
    }

    /// Status register as the host sees it.
    pub fn status(&self) -> u64 {
        let alert = if self.alerts.is_empty() {
            0
        } else {
            status::ALERT
        };
        (self.status & !status::ALERT) | alert
    }

    pub fn image_hash(&self) -> [u8; IMAGE_HASH_LEN] {
        self.image_hash
    }

    pub fn key(&self, key: u8) -> Option<&[u8]> {
        self.keys.get(&key).map(Vec::as_slice)
    }

    /// Every request decoded so far, resends included.
    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn commands(&self) -> Vec<u8> {
        self.requests.iter().map(|r| r.command).collect()
    }

    /// Non-empty frames received, decodable or not.
    pub fn frames_received(&self) -> usize {
        self.frames
    }

    pub fn keepalives(&self) -> usize {
        self.keepalives
    }

    /// Diagnostics the engine emitted through this capability set.
    pub fn logs(&self) -> &[(Level, String)] {
        &self.logs
    }

    fn receive_frame(&mut self) {
        let frame = std::mem::take(&mut self.inbound);
        if frame.is_empty() {
            self.keepalives += 1;
            return;
        }
        self.frames += 1;
        let fault = self.faults.pop_front().or(self.persistent);

        let mut buf = vec![0u8; MAX_MESSAGE_SIZE];
        let Ok(len) = cobs::decode(&frame, &mut buf) else {
            return self.decode_failure(decode_failure::COBS);
        };
        let msg = &buf[..len];
        if len < MIN_MESSAGE_SIZE || stored_checksum(msg).ok() != computed_checksum(msg).ok() {
            return self.decode_failure(decode_failure::CHECKSUM);
        }
        let Ok(header) = decode_header(msg) else {
            return self.decode_failure(decode_failure::DESERIALIZE);
        };
        if header.magic != MAGIC {
            return self.decode_failure(decode_failure::MAGIC);
        }
        if header.version != VERSION {
            return self.decode_failure(decode_failure::VERSION);
        }

        let request = Request {
            sequence: header.sequence,
            command: header.command,
            payload: payload(msg).map(<[u8]>::to_vec).unwrap_or_default(),
        };
        self.requests.push(request.clone());

        if let Some(Fault::RaiseStatus(bits)) = fault {
            self.status |= bits;
        }
        if fault == Some(Fault::Silence) {
            return;
        }
        if let Some((command, body)) = self.dispatch(&request) {
            self.reply(request.sequence, command, body, fault);
        }
    }

    fn decode_failure(&mut self, reason: u8) {
        self.push_message(Header::new(SEQ_UNKNOWN, sp::DECODEFAIL), &[reason], false);
    }

    fn reply(&mut self, sequence: u64, mut command: u8, mut body: Vec<u8>, fault: Option<Fault>) {
        match fault {
            Some(Fault::KeepAliveFirst) => self.outbound.push_back(TERMINATOR),
            Some(Fault::StaleSequence) => {
                let stale = Header::new(sequence.wrapping_sub(1) | SEQ_REPLY, command);
                self.push_message(stale, &body, false);
            }
            Some(Fault::DecodeFailure) => return self.decode_failure(decode_failure::CHECKSUM),
            Some(Fault::SequencedDecodeFailure) => {
                let header = Header::new(sequence | SEQ_REPLY, sp::DECODEFAIL);
                return self.push_message(header, &[decode_failure::DATA_LENGTH], false);
            }
            Some(Fault::BrokenFraming) => {
                // The code byte promises four data bytes; one follows.
                self.outbound.extend([0x05, 0x01, TERMINATOR]);
                return;
            }
            Some(Fault::WrongCommand) => command = sp::NONE,
            Some(Fault::ExtraByte) => body.push(0),
            _ => {}
        }
        let corrupt = fault == Some(Fault::CorruptChecksum);
        self.push_message(Header::new(sequence | SEQ_REPLY, command), &body, corrupt);
    }

    fn push_message(&mut self, header: Header, body: &[u8], corrupt: bool) {
        let mut msg = vec![0u8; MAX_MESSAGE_SIZE];
        let Ok(len) = encode_message(&mut msg, &header, body) else {
            return;
        };
        if corrupt {
            msg[len - 1] ^= 0xff;
        }
        let mut pkt = vec![0u8; MAX_PACKET_SIZE];
        let Ok(encoded) = cobs::encode(&msg[..len], &mut pkt) else {
            return;
        };
        self.outbound.extend(&pkt[..encoded]);
        self.outbound.push_back(TERMINATOR);
    }

    fn dispatch(&mut self, request: &Request) -> Option<(u8, Vec<u8>)> {
        let reply = match request.command {
            hss::REBOOT | hss::POWEROFF => return None,
            hss::BSU => (sp::BSU, vec![self.bsu]),
            hss::IDENT => (sp::IDENT, self.ident_payload()),
            hss::MACS => {
                let mut body = self.macs.base.to_vec();
                body.put_u16_le(self.macs.count);
                body.put_u8(self.macs.stride);
                (sp::MACS, body)
            }
            hss::BOOTFAIL | hss::PANIC => (sp::ACK, Vec::new()),
            hss::STATUS => {
                let mut body = Vec::with_capacity(16);
                body.put_u64_le(self.status());
                body.put_u64_le(self.startup);
                (sp::STATUS, body)
            }
            hss::ACKSTART => {
                self.status &= !status::STARTED;
                (sp::ACK, Vec::new())
            }
            hss::ALERT => {
                let body = match self.alerts.pop_front() {
                    Some((action, message)) => {
                        let mut body = vec![action];
                        body.extend_from_slice(message.as_bytes());
                        body
                    }
                    None => vec![0],
                };
                (sp::ALERT, body)
            }
            hss::ROT => (sp::ROT, request.payload.clone()),
            hss::IMAGEBLOCK => (sp::IMAGEBLOCK, self.image_block(&request.payload)),
            hss::KEYLOOKUP => (sp::KEYLOOKUP, self.key_lookup(&request.payload)),
            hss::KEYSET => (sp::KEYSET, vec![u8::from(self.key_set(&request.payload))]),
            hss::INVENTORY => (sp::INVENTORY, self.inventory_entry(&request.payload)),
            _ => (sp::DECODEFAIL, vec![decode_failure::DESERIALIZE]),
        };
        Some(reply)
    }

    fn ident_payload(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(2 * IDENT_FIELD_LEN + 4);
        let mut model = self.ident.model.as_bytes().to_vec();
        model.resize(IDENT_FIELD_LEN, 0);
        body.extend(model);
        body.put_u32_le(self.ident.revision);
        let mut serial = self.ident.serial.as_bytes().to_vec();
        serial.resize(IDENT_FIELD_LEN, 0);
        body.extend(serial);
        body
    }

    fn key_lookup(&self, mut request: &[u8]) -> Vec<u8> {
        if request.remaining() < 3 {
            return vec![u8::from(KeyLookupResult::UnknownKey)];
        }
        let id = request.get_u8();
        let max = usize::from(request.get_u16_le());

        let value = if id == key::PING {
            Some(b"pong".as_slice())
        } else {
            self.key(id)
        };
        let result = match value {
            None if id > key::DTRACE_CONF => KeyLookupResult::UnknownKey,
            None => KeyLookupResult::NoValue,
            Some([]) => KeyLookupResult::NoValue,
            Some(value) if value.len() > max => KeyLookupResult::BufferTooSmall,
            Some(value) => {
                let mut body = vec![u8::from(KeyLookupResult::Success)];
                body.extend_from_slice(value);
                return body;
            }
        };
        vec![u8::from(result)]
    }

    fn key_set(&mut self, request: &[u8]) -> KeySetResult {
        let Some((&id, data)) = request.split_first() else {
            return KeySetResult::UnknownKey;
        };
        if id > key::DTRACE_CONF {
            return KeySetResult::UnknownKey;
        }
        if id == key::PING {
            return KeySetResult::ReadOnly;
        }
        if data.len() > KEY_VALUE_MAX {
            return KeySetResult::TooLong;
        }
        self.keys.insert(id, data.to_vec());
        KeySetResult::Success
    }

    fn inventory_entry(&self, mut request: &[u8]) -> Vec<u8> {
        let invalid = vec![u8::from(InventoryResult::InvalidIndex)];
        if request.remaining() != 4 {
            return invalid;
        }
        let index = request.get_u32_le();
        let Some(entry) = usize::try_from(index).ok().and_then(|i| self.inventory.get(i)) else {
            return invalid;
        };

        let mut body = vec![u8::from(entry.result)];
        let mut name = entry.name.as_bytes().to_vec();
        name.resize(INVENTORY_NAME_LEN, 0);
        body.extend(name);
        if entry.result == InventoryResult::Success {
            body.push(entry.kind);
            body.extend_from_slice(&entry.data);
        }
        body
    }

    fn image_block(&self, request: &[u8]) -> Vec<u8> {
        if request.len() != IMAGE_HASH_LEN + 8 {
            return Vec::new();
        }
        let (hash, mut offset) = request.split_at(IMAGE_HASH_LEN);
        if hash != self.image_hash {
            return Vec::new();
        }
        let start = usize::try_from(offset.get_u64_le())
            .unwrap_or(usize::MAX)
            .min(self.image.len());
        let end = (start + IMAGE_CHUNK).min(self.image.len());
        self.image[start..end].to_vec()
    }
}

impl IpccOps for SimulatedSp {
    fn flush(&mut self) {
        self.inbound.clear();
        self.outbound.clear();
    }

    fn poll(
        &mut self,
        events: PollEvents,
        _timeout: Option<Duration>,
    ) -> ipcc_transport::Result<PollEvents> {
        let mut ready = PollEvents::empty();
        if events.contains(PollEvents::INTR) && self.readintr() {
            ready |= PollEvents::INTR;
        }
        if events.contains(PollEvents::READ) && !self.outbound.is_empty() {
            ready |= PollEvents::READ;
        }
        if events.contains(PollEvents::WRITE) {
            ready |= PollEvents::WRITE;
        }
        Ok(ready)
    }

    fn readintr(&mut self) -> bool {
        self.interrupt_line && self.status() != 0
    }

    fn read(&mut self, buf: &mut [u8]) -> ipcc_transport::Result<usize> {
        let n = buf.len().min(self.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(self.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&mut self, buf: &[u8]) -> ipcc_transport::Result<usize> {
        for &byte in buf {
            if byte == TERMINATOR {
                self.receive_frame();
            } else {
                self.inbound.push(byte);
            }
        }
        Ok(buf.len())
    }

    fn log(&mut self, level: Level, args: std::fmt::Arguments<'_>) {
        let line = args.to_string();
        forward_to_tracing(level, format_args!("{line}"));
        self.logs.push((level, line));
    }
}
