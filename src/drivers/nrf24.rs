//! nRF24L01+ transceiver driver.
//!
//! Fixed 32-byte payloads, 5-byte addresses, hardware auto-acknowledge and
//! auto-retransmit. All waits are bounded busy-polls on the status register;
//! the IRQ line is not used.
//!
//! A configured radio is handed out as a [`Link`]. While a `Link` is alive the
//! radio cannot be set up again; after it is dropped, [`Nrf24::link`] gives it
//! back and [`Nrf24::setup`] fails with [`RadioError::AlreadySetUp`] until
//! [`Nrf24::teardown`].

use embassy_time::{block_for, Duration, Instant};
use embedded_hal::digital::OutputPin;
use embedded_hal::spi::{Operation, SpiDevice};

use crate::config::RadioConfig;
use crate::error::RadioError;

pub const PAYLOAD_SIZE: usize = 32;
pub const ADDRESS_WIDTH: usize = 5;
pub const MAX_CHANNEL: u8 = 125;
pub const RX_PIPES: u8 = 6;

pub type Address = [u8; ADDRESS_WIDTH];

/// Wait for the outcome of one transmission.
pub const SEND_TIMEOUT: Duration = Duration::from_millis(50);
/// Standby to TX mode switch.
const TX_SETTLE: Duration = Duration::from_micros(150);
/// Standby to RX mode switch.
const RX_SETTLE: Duration = Duration::from_micros(130);
/// CE high time that starts a transmission (datasheet minimum is 10 µs).
const CE_PULSE: Duration = Duration::from_micros(15);
/// Power-on reset.
const POWER_ON_SETTLE: Duration = Duration::from_millis(5);

// Registers
const CONFIG: u8 = 0x00;
const SETUP_AW: u8 = 0x03;
const SETUP_RETR: u8 = 0x04;
const RF_CH: u8 = 0x05;
const RF_SETUP: u8 = 0x06;
const STATUS: u8 = 0x07;
const OBSERVE_TX: u8 = 0x08;
const EN_RXADDR: u8 = 0x02;
const RX_ADDR_P0: u8 = 0x0A;
const TX_ADDR: u8 = 0x10;
const RX_PW_P0: u8 = 0x11;
const FIFO_STATUS: u8 = 0x17;
const DYNPD: u8 = 0x1C;

// CONFIG bits
const PRIM_RX: u8 = 0x01;
const PWR_UP: u8 = 0x02;
const CRCO: u8 = 0x04;
const EN_CRC: u8 = 0x08;

// STATUS bits, write 1 to clear
const RX_DR: u8 = 0x40;
const TX_DS: u8 = 0x20;
const MAX_RT: u8 = 0x10;
const STATUS_FLAGS: u8 = RX_DR | TX_DS | MAX_RT;

// FIFO_STATUS bits
const RX_EMPTY: u8 = 0x01;

// RF_SETUP bits outside power and data rate
const RF_SETUP_KEEP: u8 = 0b1101_0001;

const AW_5_BYTES: u8 = 0b11;

// Commands
const R_REGISTER: u8 = 0x00;
const W_REGISTER: u8 = 0x20;
const R_RX_PAYLOAD: u8 = 0x61;
const W_TX_PAYLOAD: u8 = 0xA0;
const FLUSH_TX: u8 = 0xE1;
const FLUSH_RX: u8 = 0xE2;
const NOP: u8 = 0xFF;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerLevel {
    DbmMinus18,
    DbmMinus12,
    DbmMinus6,
    Dbm0,
}

impl PowerLevel {
    fn bits(self) -> u8 {
        match self {
            PowerLevel::DbmMinus18 => 0x00,
            PowerLevel::DbmMinus12 => 0x02,
            PowerLevel::DbmMinus6 => 0x04,
            PowerLevel::Dbm0 => 0x06,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataRate {
    Kbps250,
    Mbps1,
    Mbps2,
}

impl DataRate {
    fn bits(self) -> u8 {
        match self {
            DataRate::Kbps250 => 0x20,
            DataRate::Mbps1 => 0x00,
            DataRate::Mbps2 => 0x08,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CrcLength {
    Disabled,
    OneByte,
    TwoBytes,
}

impl CrcLength {
    fn bits(self) -> u8 {
        match self {
            CrcLength::Disabled => 0,
            CrcLength::OneByte => EN_CRC,
            CrcLength::TwoBytes => EN_CRC | CRCO,
        }
    }
}

/// How a single transmission ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendOutcome {
    /// The receiver acknowledged the payload.
    Acknowledged,
    /// The hardware gave up after the configured number of retransmits.
    MaxRetriesExceeded,
    /// Neither flag showed up before the deadline.
    Timeout,
}

/// Auto-retransmit counters, for link-quality diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorInfo {
    /// Last transmission hit the retransmit limit.
    pub max_retries: bool,
    /// Retransmits of the last packet.
    pub retransmits: u8,
    /// Packets lost since the channel was last written (saturates at 15).
    pub lost_packets: u8,
}

impl ErrorInfo {
    fn from_registers(status: u8, observe_tx: u8) -> Self {
        Self {
            max_retries: status & MAX_RT != 0,
            retransmits: observe_tx & 0x0F,
            lost_packets: observe_tx >> 4,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct LinkState {
    local: Address,
    remote: Address,
}

pub struct Nrf24<SPI, CE> {
    spi: SPI,
    ce: CE,
    config: RadioConfig,
    link: Option<LinkState>,
    tx_address: Option<Address>,
    pipe0_read_address: Option<Address>,
    /// MAX_RT of the last completed send; the status flag itself is cleared
    /// when the send completes.
    last_max_rt: bool,
}

impl<SPI, CE> Nrf24<SPI, CE>
where
    SPI: SpiDevice,
    CE: OutputPin,
{
    pub fn new(spi: SPI, ce: CE, config: RadioConfig) -> Self {
        Self {
            spi,
            ce,
            config,
            link: None,
            tx_address: None,
            pipe0_read_address: None,
            last_max_rt: false,
        }
    }

    pub fn config(&self) -> &RadioConfig {
        &self.config
    }

    pub fn is_set_up(&self) -> bool {
        self.link.is_some()
    }

    /// Configure the transceiver: transmit (and receive acknowledgements) on
    /// `local`, listen on pipe 1 for `remote`.
    ///
    /// A failed self-test leaves the radio powered down and not set up.
    pub fn setup(
        &mut self,
        local: Address,
        remote: Address,
    ) -> Result<Link<'_, SPI, CE>, RadioError> {
        if self.link.is_some() {
            return Err(RadioError::AlreadySetUp);
        }

        if let Err(err) = self.configure(local, remote) {
            log_warn!("nrf24: setup failed: {:?}", err);
            self.power_down_quietly();
            return Err(err);
        }

        self.link = Some(LinkState { local, remote });
        log_info!(
            "nrf24: link up on channel {}, local {:?} remote {:?}",
            self.config.channel,
            local,
            remote
        );
        Ok(Link { radio: self })
    }

    /// Handle to an already configured radio.
    pub fn link(&mut self) -> Result<Link<'_, SPI, CE>, RadioError> {
        if self.link.is_none() {
            return Err(RadioError::NotSetUp);
        }
        Ok(Link { radio: self })
    }

    /// Power the transceiver down and forget the link. No-op if not set up.
    pub fn teardown(&mut self) {
        if self.link.take().is_some() {
            self.power_down_quietly();
            self.tx_address = None;
            self.pipe0_read_address = None;
            self.last_max_rt = false;
            log_info!("nrf24: link down");
        }
    }

    /// Give the bus device and the chip-enable pin back.
    pub fn release(mut self) -> (SPI, CE) {
        self.teardown();
        (self.spi, self.ce)
    }

    fn configure(&mut self, local: Address, remote: Address) -> Result<(), RadioError> {
        self.ce_low()?;
        block_for(POWER_ON_SETTLE);

        // Address width doubles as the self-test: a missing chip reads back 0x00 or 0xFF
        self.write_register(SETUP_AW, AW_5_BYTES)?;
        let aw = self.read_register(SETUP_AW)?;
        if aw != AW_5_BYTES {
            log_warn!("nrf24: address width read back 0x{:x}", aw);
            return Err(RadioError::HardwareNotResponding);
        }

        // Static payload length on all pipes
        self.write_register(DYNPD, 0)?;
        let retr = ((self.config.retry_delay_units & 0x0F) << 4) | (self.config.retry_count & 0x0F);
        self.write_register(SETUP_RETR, retr)?;

        self.set_power_speed(self.config.power, self.config.data_rate)?;
        self.set_crc(self.config.crc)?;
        self.write_register(STATUS, STATUS_FLAGS)?;
        self.set_channel(self.config.channel)?;
        self.command(FLUSH_RX)?;
        self.command(FLUSH_TX)?;

        self.open_tx_pipe(local)?;
        self.open_rx_pipe(1, remote)
    }

    fn power_down_quietly(&mut self) {
        let result = self.ce_low().and_then(|_| {
            let config = self.read_register(CONFIG)?;
            self.write_register(CONFIG, config & !(PWR_UP | PRIM_RX))?;
            self.command(FLUSH_TX)?;
            self.command(FLUSH_RX)
        });
        if let Err(err) = result {
            log_debug!("nrf24: power down failed: {:?}", err);
        }
    }

    fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        let channel = channel.min(MAX_CHANNEL);
        self.config.channel = channel;
        self.write_register(RF_CH, channel)
    }

    fn set_power_speed(&mut self, power: PowerLevel, rate: DataRate) -> Result<(), RadioError> {
        let setup = self.read_register(RF_SETUP)? & RF_SETUP_KEEP;
        self.write_register(RF_SETUP, setup | power.bits() | rate.bits())?;
        self.config.power = power;
        self.config.data_rate = rate;
        Ok(())
    }

    fn set_crc(&mut self, crc: CrcLength) -> Result<(), RadioError> {
        let config = self.read_register(CONFIG)? & !(EN_CRC | CRCO);
        self.write_register(CONFIG, config | crc.bits())?;
        self.config.crc = crc;
        Ok(())
    }

    fn open_tx_pipe(&mut self, address: Address) -> Result<(), RadioError> {
        // Acknowledgements come back on pipe 0
        self.write_address(RX_ADDR_P0, &address)?;
        self.write_address(TX_ADDR, &address)?;
        self.tx_address = Some(address);
        self.write_register(RX_PW_P0, PAYLOAD_SIZE as u8)
    }

    fn open_rx_pipe(&mut self, pipe: u8, address: Address) -> Result<(), RadioError> {
        if pipe >= RX_PIPES {
            return Err(RadioError::InvalidPipe(pipe));
        }
        if pipe < 2 {
            self.write_address(RX_ADDR_P0 + pipe, &address)?;
        } else {
            // Pipes 2..=5 share bytes 1..=4 with pipe 1
            self.write_register(RX_ADDR_P0 + pipe, address[0])?;
        }
        if pipe == 0 {
            self.pipe0_read_address = Some(address);
        }
        self.write_register(RX_PW_P0 + pipe, PAYLOAD_SIZE as u8)?;
        let enabled = self.read_register(EN_RXADDR)?;
        self.write_register(EN_RXADDR, enabled | (1 << pipe))
    }

    fn start_listening(&mut self) -> Result<(), RadioError> {
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, config | PWR_UP | PRIM_RX)?;
        self.write_register(STATUS, STATUS_FLAGS)?;

        // open_tx_pipe() may have taken pipe 0 over for acknowledgements
        if let Some(address) = self.pipe0_read_address {
            self.write_address(RX_ADDR_P0, &address)?;
        }

        self.command(FLUSH_RX)?;
        self.command(FLUSH_TX)?;
        self.ce_high()?;
        block_for(RX_SETTLE);
        Ok(())
    }

    fn stop_listening(&mut self) -> Result<(), RadioError> {
        self.ce_low()?;
        self.command(FLUSH_TX)?;
        self.command(FLUSH_RX)?;
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, config & !PRIM_RX)?;

        // Hand pipe 0 back to acknowledgements
        if let Some(address) = self.tx_address {
            self.write_address(RX_ADDR_P0, &address)?;
        }
        Ok(())
    }

    fn any(&mut self) -> Result<bool, RadioError> {
        Ok(self.read_register(FIFO_STATUS)? & RX_EMPTY == 0)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        let mut payload = [0u8; PAYLOAD_SIZE];
        self.spi
            .transaction(&mut [
                Operation::Write(&[R_RX_PAYLOAD]),
                Operation::Read(&mut payload),
            ])
            .map_err(RadioError::bus)?;
        self.write_register(STATUS, RX_DR)?;

        let len = buf.len().min(PAYLOAD_SIZE);
        buf[..len].copy_from_slice(&payload[..len]);
        Ok(len)
    }

    fn send_until(&mut self, payload: &[u8], deadline: Instant) -> Result<SendOutcome, RadioError> {
        if payload.is_empty() || payload.len() > PAYLOAD_SIZE {
            return Err(RadioError::InvalidPayloadSize(payload.len()));
        }

        self.send_start(payload)?;
        loop {
            if let Some(outcome) = self.send_done()? {
                return Ok(outcome);
            }
            if Instant::now() >= deadline {
                // Drop the stale payload so the next send starts clean
                self.power_down_quietly();
                log_debug!("nrf24: send timed out");
                return Ok(SendOutcome::Timeout);
            }
        }
    }

    fn send_start(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        // CE high in TX mode would fire whatever sits in the FIFO
        self.ce_low()?;
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, (config | PWR_UP) & !PRIM_RX)?;
        block_for(TX_SETTLE);

        let padding = [0u8; PAYLOAD_SIZE];
        self.spi
            .transaction(&mut [
                Operation::Write(&[W_TX_PAYLOAD]),
                Operation::Write(payload),
                Operation::Write(&padding[payload.len()..]),
            ])
            .map_err(RadioError::bus)?;

        self.ce_high()?;
        block_for(CE_PULSE);
        self.ce_low()
    }

    fn send_done(&mut self) -> Result<Option<SendOutcome>, RadioError> {
        let status = self.status()?;
        if status & (TX_DS | MAX_RT) == 0 {
            return Ok(None);
        }

        self.write_register(STATUS, STATUS_FLAGS)?;
        let config = self.read_register(CONFIG)?;
        self.write_register(CONFIG, config & !PWR_UP)?;

        self.last_max_rt = status & TX_DS == 0;
        if status & TX_DS != 0 {
            Ok(Some(SendOutcome::Acknowledged))
        } else {
            // The unacknowledged payload stays in the TX FIFO
            self.command(FLUSH_TX)?;
            Ok(Some(SendOutcome::MaxRetriesExceeded))
        }
    }

    fn error_info(&mut self) -> Result<ErrorInfo, RadioError> {
        let status = self.status()?;
        let observe = self.read_register(OBSERVE_TX)?;
        let mut info = ErrorInfo::from_registers(status, observe);
        info.max_retries |= self.last_max_rt;
        Ok(info)
    }

    fn clear_error_info(&mut self) -> Result<(), RadioError> {
        self.write_register(STATUS, STATUS_FLAGS)?;
        self.last_max_rt = false;
        // Writing RF_CH resets the lost packet counter
        self.write_register(RF_CH, self.config.channel)
    }

    fn status(&mut self) -> Result<u8, RadioError> {
        let mut buf = [NOP];
        self.spi.transfer_in_place(&mut buf).map_err(RadioError::bus)?;
        Ok(buf[0])
    }

    fn command(&mut self, command: u8) -> Result<(), RadioError> {
        self.spi.write(&[command]).map_err(RadioError::bus)
    }

    fn read_register(&mut self, reg: u8) -> Result<u8, RadioError> {
        let mut buf = [R_REGISTER | reg, NOP];
        self.spi.transfer_in_place(&mut buf).map_err(RadioError::bus)?;
        Ok(buf[1])
    }

    fn write_register(&mut self, reg: u8, value: u8) -> Result<(), RadioError> {
        self.spi.write(&[W_REGISTER | reg, value]).map_err(RadioError::bus)
    }

    fn write_address(&mut self, reg: u8, address: &Address) -> Result<(), RadioError> {
        self.spi
            .transaction(&mut [Operation::Write(&[W_REGISTER | reg]), Operation::Write(address)])
            .map_err(RadioError::bus)
    }

    fn ce_low(&mut self) -> Result<(), RadioError> {
        self.ce.set_low().map_err(RadioError::pin)
    }

    fn ce_high(&mut self) -> Result<(), RadioError> {
        self.ce.set_high().map_err(RadioError::pin)
    }
}

/// A configured radio.
pub struct Link<'a, SPI, CE> {
    radio: &'a mut Nrf24<SPI, CE>,
}

impl<SPI, CE> Link<'_, SPI, CE>
where
    SPI: SpiDevice,
    CE: OutputPin,
{
    pub fn local_address(&self) -> Address {
        self.state().local
    }

    pub fn remote_address(&self) -> Address {
        self.state().remote
    }

    fn state(&self) -> LinkState {
        // A Link only exists while the radio holds a link state
        self.radio.link.unwrap_or(LinkState {
            local: [0; ADDRESS_WIDTH],
            remote: [0; ADDRESS_WIDTH],
        })
    }

    pub fn channel(&self) -> u8 {
        self.radio.config.channel
    }

    /// Switch RF channel; values above 125 are clamped.
    pub fn set_channel(&mut self, channel: u8) -> Result<(), RadioError> {
        self.radio.set_channel(channel)
    }

    pub fn set_power_speed(&mut self, power: PowerLevel, rate: DataRate) -> Result<(), RadioError> {
        self.radio.set_power_speed(power, rate)
    }

    pub fn set_crc(&mut self, crc: CrcLength) -> Result<(), RadioError> {
        self.radio.set_crc(crc)
    }

    /// Point transmissions (and pipe 0, for acknowledgements) at `address`.
    pub fn open_tx_pipe(&mut self, address: Address) -> Result<(), RadioError> {
        self.radio.open_tx_pipe(address)
    }

    /// Listen on `pipe` (0..=5) for `address`. Pipes 2..=5 only use the first
    /// address byte; the rest is shared with pipe 1.
    pub fn open_rx_pipe(&mut self, pipe: u8, address: Address) -> Result<(), RadioError> {
        self.radio.open_rx_pipe(pipe, address)
    }

    pub fn start_listening(&mut self) -> Result<(), RadioError> {
        self.radio.start_listening()
    }

    pub fn stop_listening(&mut self) -> Result<(), RadioError> {
        self.radio.stop_listening()
    }

    /// Whether a received payload is waiting.
    pub fn any(&mut self) -> Result<bool, RadioError> {
        self.radio.any()
    }

    /// Pop the oldest received payload into `buf`. Does not wait; check
    /// [`Link::any`] first. Returns the number of bytes copied.
    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, RadioError> {
        self.radio.recv(buf)
    }

    /// Transmit 1..=32 bytes and wait up to [`SEND_TIMEOUT`] for the outcome.
    pub fn send(&mut self, payload: &[u8]) -> Result<SendOutcome, RadioError> {
        self.send_until(payload, deadline_after(SEND_TIMEOUT))
    }

    pub fn send_until(&mut self, payload: &[u8], deadline: Instant) -> Result<SendOutcome, RadioError> {
        self.radio.send_until(payload, deadline)
    }

    pub fn error_info(&mut self) -> Result<ErrorInfo, RadioError> {
        self.radio.error_info()
    }

    pub fn clear_error_info(&mut self) -> Result<(), RadioError> {
        self.radio.clear_error_info()
    }

    /// Spoke side: push one payload to the hub, acknowledged or not at all.
    pub fn spoke_to_hub(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        match self.send(payload)? {
            SendOutcome::Acknowledged => Ok(()),
            outcome => Err(RadioError::SendFailed(outcome)),
        }
    }

    /// Hub side: send `request` to `spoke` and wait up to `window` for its reply.
    pub fn hub_to_spoke(
        &mut self,
        spoke: Address,
        request: &[u8],
        window: Duration,
    ) -> Result<[u8; PAYLOAD_SIZE], RadioError> {
        if request.len() > PAYLOAD_SIZE {
            return Err(RadioError::PayloadTooLong(request.len()));
        }

        self.stop_listening()?;
        self.open_tx_pipe(spoke)?;
        match self.send(request)? {
            SendOutcome::Acknowledged => {}
            outcome => return Err(RadioError::SendFailed(outcome)),
        }

        self.start_listening()?;
        let reply = self.wait_for_reply(deadline_after(window));
        // Leave RX mode even when polling failed
        let stopped = self.stop_listening();
        let reply = reply?;
        stopped?;
        Ok(reply)
    }

    fn wait_for_reply(&mut self, deadline: Instant) -> Result<[u8; PAYLOAD_SIZE], RadioError> {
        loop {
            if self.any()? {
                let mut reply = [0u8; PAYLOAD_SIZE];
                self.recv(&mut reply)?;
                return Ok(reply);
            }
            if Instant::now() >= deadline {
                return Err(RadioError::ReceiveTimeout);
            }
        }
    }
}

/// `now + timeout`, saturating instead of overflowing.
fn deadline_after(timeout: Duration) -> Instant {
    Instant::now().checked_add(timeout).unwrap_or(Instant::MAX)
}
