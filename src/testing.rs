//! Host-side hardware doubles.
//!
//! Each mock is a cheap handle around shared state: clone it, give one clone
//! to the driver under test and keep the other for inspection.

use core::convert::Infallible;
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;
use std::vec::Vec;

use embedded_hal::{digital, i2c, spi};

// ---------------------------------------------------------------------------
// I2C

/// Error returned for transactions to an address nobody answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockI2cError(i2c::ErrorKind);

impl i2c::Error for MockI2cError {
    fn kind(&self) -> i2c::ErrorKind {
        self.0
    }
}

#[derive(Debug)]
struct RegisterFile {
    registers: [u8; 256],
    pointer: u8,
}

#[derive(Debug, Default)]
struct I2cState {
    devices: BTreeMap<u8, RegisterFile>,
    writes: Vec<(u8, u8, u8)>,
}

/// I2C bus with register-file devices: the first written byte selects the
/// register, further bytes are written (or read) with auto-increment.
#[derive(Debug, Clone, Default)]
pub struct MockI2c {
    state: Rc<RefCell<I2cState>>,
}

impl MockI2c {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, address: u8) {
        self.state.borrow_mut().devices.insert(
            address,
            RegisterFile {
                registers: [0; 256],
                pointer: 0,
            },
        );
    }

    /// Unplug a device; subsequent transactions to it are not acknowledged.
    pub fn remove_device(&self, address: u8) {
        self.state.borrow_mut().devices.remove(&address);
    }

    /// Preload registers without recording them as writes.
    pub fn set_registers(&self, address: u8, start: u8, values: &[u8]) {
        let mut state = self.state.borrow_mut();
        if let Some(device) = state.devices.get_mut(&address) {
            for (i, value) in values.iter().enumerate() {
                device.registers[start.wrapping_add(i as u8) as usize] = *value;
            }
        }
    }

    pub fn register(&self, address: u8, reg: u8) -> u8 {
        self.state
            .borrow()
            .devices
            .get(&address)
            .map_or(0, |device| device.registers[reg as usize])
    }

    /// Register writes done by the driver, as (address, register, value).
    pub fn writes(&self) -> Vec<(u8, u8, u8)> {
        self.state.borrow().writes.clone()
    }
}

impl i2c::ErrorType for MockI2c {
    type Error = MockI2cError;
}

impl i2c::I2c for MockI2c {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [i2c::Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        let I2cState { devices, writes } = &mut *state;
        let device = devices.get_mut(&address).ok_or(MockI2cError(
            i2c::ErrorKind::NoAcknowledge(i2c::NoAcknowledgeSource::Address),
        ))?;

        for operation in operations.iter_mut() {
            match operation {
                i2c::Operation::Write(bytes) => {
                    if let Some((&reg, data)) = bytes.split_first() {
                        device.pointer = reg;
                        for &value in data {
                            device.registers[device.pointer as usize] = value;
                            writes.push((address, device.pointer, value));
                            device.pointer = device.pointer.wrapping_add(1);
                        }
                    }
                }
                i2c::Operation::Read(buf) => {
                    for byte in buf.iter_mut() {
                        *byte = device.registers[device.pointer as usize];
                        device.pointer = device.pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// nRF24L01+

const R_RX_PAYLOAD: u8 = 0x61;
const W_TX_PAYLOAD: u8 = 0xA0;
const FLUSH_TX: u8 = 0xE1;
const FLUSH_RX: u8 = 0xE2;

const CONFIG: usize = 0x00;
const SETUP_RETR: usize = 0x04;
const RF_CH: usize = 0x05;
const STATUS: usize = 0x07;
const OBSERVE_TX: usize = 0x08;
const FIFO_STATUS: usize = 0x17;

const PRIM_RX: u8 = 0x01;
const PWR_UP: u8 = 0x02;
const RX_DR: u8 = 0x40;
const TX_DS: u8 = 0x20;
const MAX_RT: u8 = 0x10;

const FIFO_DEPTH: usize = 3;

/// Registers holding a full 5-byte address.
fn is_address_register(reg: u8) -> bool {
    matches!(reg, 0x0A | 0x0B | 0x10)
}

/// What the simulated peer does with a transmitted payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxBehavior {
    Ack,
    MaxRetries,
    /// No flag is ever raised.
    Silent,
}

#[derive(Debug)]
struct Frame {
    command: Option<u8>,
    index: usize,
    tx_payload: Vec<u8>,
    rx_payload: [u8; 32],
}

#[derive(Debug)]
struct RadioState {
    registers: [u8; 0x20],
    addresses: BTreeMap<u8, [u8; 5]>,
    tx_fifo: VecDeque<[u8; 32]>,
    rx_fifo: VecDeque<[u8; 32]>,
    pending_replies: VecDeque<[u8; 32]>,
    sent: Vec<[u8; 32]>,
    behavior: TxBehavior,
    unresponsive: bool,
    failing_command: Option<u8>,
    ce_high: bool,
}

impl RadioState {
    fn new() -> Self {
        let mut registers = [0u8; 0x20];
        registers[CONFIG] = 0x08;
        registers[0x01] = 0x3F;
        registers[0x02] = 0x03;
        registers[0x03] = 0x03;
        registers[SETUP_RETR] = 0x03;
        registers[RF_CH] = 0x02;
        registers[0x06] = 0x0E;
        registers[STATUS] = 0x0E;
        for pipe in 2..6u8 {
            registers[0x0A + pipe as usize] = 0xC1 + pipe;
        }

        let mut addresses = BTreeMap::new();
        addresses.insert(0x0A, [0xE7; 5]);
        addresses.insert(0x0B, [0xC2; 5]);
        addresses.insert(0x10, [0xE7; 5]);

        Self {
            registers,
            addresses,
            tx_fifo: VecDeque::new(),
            rx_fifo: VecDeque::new(),
            pending_replies: VecDeque::new(),
            sent: Vec::new(),
            behavior: TxBehavior::Ack,
            unresponsive: false,
            failing_command: None,
            ce_high: false,
        }
    }

    fn status(&self) -> u8 {
        let pipe = if self.rx_fifo.is_empty() { 0b111 << 1 } else { 0 };
        let tx_full = u8::from(self.tx_fifo.len() >= FIFO_DEPTH);
        (self.registers[STATUS] & (RX_DR | TX_DS | MAX_RT)) | pipe | tx_full
    }

    fn read(&self, reg: u8, index: usize) -> u8 {
        if is_address_register(reg) {
            return self.addresses.get(&reg).map_or(0, |a| a[index.min(4)]);
        }
        if index > 0 {
            return 0;
        }
        match reg as usize {
            STATUS => self.status(),
            FIFO_STATUS => {
                let rx_empty = u8::from(self.rx_fifo.is_empty());
                let rx_full = u8::from(self.rx_fifo.len() >= FIFO_DEPTH) << 1;
                let tx_empty = u8::from(self.tx_fifo.is_empty()) << 4;
                let tx_full = u8::from(self.tx_fifo.len() >= FIFO_DEPTH) << 5;
                rx_empty | rx_full | tx_empty | tx_full
            }
            r => self.registers[r],
        }
    }

    fn write(&mut self, reg: u8, index: usize, value: u8) {
        if is_address_register(reg) {
            if let Some(slot) = self.addresses.entry(reg).or_insert([0; 5]).get_mut(index) {
                *slot = value;
            }
            return;
        }
        if index > 0 {
            return;
        }
        match reg as usize {
            STATUS => self.registers[STATUS] &= !(value & (RX_DR | TX_DS | MAX_RT)),
            RF_CH => {
                self.registers[RF_CH] = value & 0x7F;
                // Lost packet count resets on channel write
                self.registers[OBSERVE_TX] &= 0x0F;
            }
            OBSERVE_TX | FIFO_STATUS => {}
            r => self.registers[r] = value,
        }
    }

    fn exchange(&mut self, frame: &mut Frame, byte: u8) -> u8 {
        if self.unresponsive {
            return 0;
        }

        let index = frame.index;
        frame.index += 1;
        let Some(command) = frame.command else {
            frame.command = Some(byte);
            match byte {
                FLUSH_TX => self.tx_fifo.clear(),
                FLUSH_RX => self.rx_fifo.clear(),
                R_RX_PAYLOAD => {
                    frame.rx_payload = self.rx_fifo.pop_front().unwrap_or([0; 32]);
                }
                _ => {}
            }
            return self.status();
        };

        let data_index = index - 1;
        match command {
            c if c < 0x20 => self.read(c, data_index),
            c if c < 0x40 => {
                self.write(c & 0x1F, data_index, byte);
                0
            }
            R_RX_PAYLOAD => frame.rx_payload.get(data_index).copied().unwrap_or(0),
            W_TX_PAYLOAD => {
                frame.tx_payload.push(byte);
                0
            }
            _ => 0,
        }
    }

    fn end_frame(&mut self, frame: Frame) {
        if frame.command == Some(W_TX_PAYLOAD) && self.tx_fifo.len() < FIFO_DEPTH {
            let mut payload = [0u8; 32];
            let len = frame.tx_payload.len().min(32);
            payload[..len].copy_from_slice(&frame.tx_payload[..len]);
            self.tx_fifo.push_back(payload);
        }
    }

    fn ce_rising(&mut self) {
        let config = self.registers[CONFIG];
        if config & PWR_UP == 0 {
            return;
        }

        if config & PRIM_RX != 0 {
            while let Some(reply) = self.pending_replies.pop_front() {
                if self.rx_fifo.len() < FIFO_DEPTH {
                    self.rx_fifo.push_back(reply);
                    self.registers[STATUS] |= RX_DR;
                }
            }
            return;
        }

        let Some(&payload) = self.tx_fifo.front() else {
            return;
        };
        match self.behavior {
            TxBehavior::Ack => {
                self.tx_fifo.pop_front();
                self.sent.push(payload);
                self.registers[STATUS] |= TX_DS;
                self.registers[OBSERVE_TX] &= 0xF0;
            }
            TxBehavior::MaxRetries => {
                // Payload stays queued until flushed
                self.sent.push(payload);
                self.registers[STATUS] |= MAX_RT;
                let retries = self.registers[SETUP_RETR] & 0x0F;
                let lost = ((self.registers[OBSERVE_TX] >> 4) + 1).min(0x0F);
                self.registers[OBSERVE_TX] = (lost << 4) | retries;
            }
            TxBehavior::Silent => {}
        }
    }
}

/// Simulated nRF24L01+ behind an SPI device, with an instantly answering peer.
#[derive(Debug, Clone)]
pub struct MockNrf24 {
    state: Rc<RefCell<RadioState>>,
}

impl Default for MockNrf24 {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNrf24 {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(RadioState::new())),
        }
    }

    /// Chip-enable line wired to this chip.
    pub fn ce(&self) -> MockCe {
        MockCe {
            state: self.state.clone(),
        }
    }

    pub fn register(&self, reg: u8) -> u8 {
        self.state.borrow().read(reg, 0)
    }

    pub fn address(&self, reg: u8) -> [u8; 5] {
        self.state.borrow().addresses.get(&reg).copied().unwrap_or([0; 5])
    }

    pub fn set_tx_behavior(&self, behavior: TxBehavior) {
        self.state.borrow_mut().behavior = behavior;
    }

    /// A chip that reads back all zeros and ignores writes.
    pub fn set_unresponsive(&self, unresponsive: bool) {
        self.state.borrow_mut().unresponsive = unresponsive;
    }

    /// Every transaction starting with `command` fails with a bus error.
    pub fn fail_command(&self, command: Option<u8>) {
        self.state.borrow_mut().failing_command = command;
    }

    /// Payload the peer sends back once the radio listens.
    pub fn queue_reply(&self, payload: &[u8; 32]) {
        self.state.borrow_mut().pending_replies.push_back(*payload);
    }

    /// Every payload put on the air, padded to 32 bytes.
    pub fn sent(&self) -> Vec<[u8; 32]> {
        self.state.borrow().sent.clone()
    }

    pub fn tx_fifo_len(&self) -> usize {
        self.state.borrow().tx_fifo.len()
    }

    pub fn ce_is_high(&self) -> bool {
        self.state.borrow().ce_high
    }
}

/// Bus fault injected with [`MockNrf24::fail_command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockSpiError;

impl spi::Error for MockSpiError {
    fn kind(&self) -> spi::ErrorKind {
        spi::ErrorKind::Other
    }
}

fn first_byte(operations: &[spi::Operation<'_, u8>]) -> Option<u8> {
    match operations.first()? {
        spi::Operation::Write(bytes) => bytes.first().copied(),
        spi::Operation::Transfer(_, write) => write.first().copied(),
        spi::Operation::TransferInPlace(buf) => buf.first().copied(),
        _ => None,
    }
}

impl spi::ErrorType for MockNrf24 {
    type Error = MockSpiError;
}

impl spi::SpiDevice for MockNrf24 {
    fn transaction(&mut self, operations: &mut [spi::Operation<'_, u8>]) -> Result<(), MockSpiError> {
        let mut state = self.state.borrow_mut();
        if state.failing_command.is_some() && state.failing_command == first_byte(operations) {
            return Err(MockSpiError);
        }
        let mut frame = Frame {
            command: None,
            index: 0,
            tx_payload: Vec::new(),
            rx_payload: [0; 32],
        };

        for operation in operations.iter_mut() {
            match operation {
                spi::Operation::Write(bytes) => {
                    for &byte in bytes.iter() {
                        state.exchange(&mut frame, byte);
                    }
                }
                spi::Operation::Read(buf) => {
                    for slot in buf.iter_mut() {
                        *slot = state.exchange(&mut frame, 0xFF);
                    }
                }
                spi::Operation::Transfer(read, write) => {
                    let len = read.len().max(write.len());
                    for i in 0..len {
                        let out = write.get(i).copied().unwrap_or(0xFF);
                        let response = state.exchange(&mut frame, out);
                        if let Some(slot) = read.get_mut(i) {
                            *slot = response;
                        }
                    }
                }
                spi::Operation::TransferInPlace(buf) => {
                    for slot in buf.iter_mut() {
                        *slot = state.exchange(&mut frame, *slot);
                    }
                }
                spi::Operation::DelayNs(_) => {}
            }
        }

        if !state.unresponsive {
            state.end_frame(frame);
        }
        Ok(())
    }
}

/// Chip-enable pin of a [`MockNrf24`].
#[derive(Debug, Clone)]
pub struct MockCe {
    state: Rc<RefCell<RadioState>>,
}

impl digital::ErrorType for MockCe {
    type Error = Infallible;
}

impl digital::OutputPin for MockCe {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.state.borrow_mut().ce_high = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        let mut state = self.state.borrow_mut();
        if !state.ce_high {
            state.ce_high = true;
            state.ce_rising();
        }
        Ok(())
    }
}
