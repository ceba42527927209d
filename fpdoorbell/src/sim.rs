//! Simulated fingerprint module
//!
//! An in-memory [`Transport`] that decodes command frames and answers them
//! the way an R503 would: a template library, character buffers, a finger
//! that can be placed and lifted, and `UpChar`/`DownChar` data streams.
//! Replies can be overridden per instruction through [`SimHandle::script`],
//! and the line can be made silent or noisy.
//!
//! Tests and the demos drive the doorbell against it; nothing here touches
//! real hardware.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tracing::{debug, trace};

use fpdoorbell_core::{
    constants::{data_packet_len, CHAR_BUFFER_COUNT, DEFAULT_ADDRESS, DEFAULT_PASSWORD, INDEX_PAGE_SLOTS},
    Command, ConfirmationCode, FrameDecoder, Instruction, Packet, PacketType,
};
use fpdoorbell_transport::{Error as TransportError, Result as TransportResult, Transport};
use fpdoorbell_types::{SensorInfo, StatusFlags};

/// Size of the templates produced by [`sample_template`]
pub const SIM_TEMPLATE_SIZE: usize = 1536;

/// Deterministic template bytes for a finger labelled `seed`
///
/// Different seeds never produce the same template.
pub fn sample_template(seed: u8) -> Bytes {
    (0..SIM_TEMPLATE_SIZE)
        .map(|i| {
            if i == 0 {
                seed
            } else {
                (i as u8).wrapping_mul(29) ^ seed.rotate_left(i as u32 % 8)
            }
        })
        .collect::<Vec<u8>>()
        .into()
}

/// Scripted reply to one command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimReply {
    /// Answer with this confirmation code instead of the normal result
    Code(ConfirmationCode),

    /// Swallow the command
    Silent,
}

impl From<ConfirmationCode> for SimReply {
    fn from(code: ConfirmationCode) -> Self {
        Self::Code(code)
    }
}

#[derive(Debug)]
struct SimState {
    online: bool,
    connected: bool,
    password: u32,
    info: SensorInfo,
    library: BTreeMap<u16, Bytes>,
    buffers: Vec<Option<Bytes>>,
    finger: Option<Bytes>,
    image: Option<Bytes>,
    scripts: HashMap<Instruction, VecDeque<SimReply>>,
    inbound: FrameDecoder,
    outbound: BytesMut,
    download: Option<(u8, BytesMut)>,
    noise: Vec<u8>,
    corrupt_in: Option<usize>,
    log: Vec<Instruction>,
}

impl SimState {
    fn new() -> Self {
        Self {
            online: true,
            connected: false,
            password: DEFAULT_PASSWORD,
            info: SensorInfo {
                status: StatusFlags::empty(),
                system_id: 0x0009,
                capacity: 200,
                security_level: 3,
                address: DEFAULT_ADDRESS,
                packet_size_code: 2,
                baud_setting: 6,
            },
            library: BTreeMap::new(),
            buffers: vec![None; usize::from(CHAR_BUFFER_COUNT) + 1],
            finger: None,
            image: None,
            scripts: HashMap::new(),
            inbound: FrameDecoder::new(),
            outbound: BytesMut::new(),
            download: None,
            noise: Vec::new(),
            corrupt_in: None,
            log: Vec::new(),
        }
    }

    fn receive_frames(&mut self, data: &[u8]) {
        self.inbound.extend(data);

        loop {
            match self.inbound.next_packet() {
                Ok(Some(packet)) => self.handle_packet(packet),
                Ok(None) => break,
                Err(e) => {
                    debug!("Simulated sensor rejected frame: {}", e);
                    self.reply(ConfirmationCode::PacketReceiveError, &[]);
                }
            }
        }
    }

    fn handle_packet(&mut self, packet: Packet) {
        if packet.address != self.info.address {
            trace!("Ignoring frame for 0x{:08X}", packet.address);
            return;
        }

        match packet.packet_type {
            PacketType::Command => match Command::from_payload(packet.payload()) {
                Ok(command) => self.handle_command(command),
                Err(e) => {
                    debug!("Simulated sensor got bad command: {}", e);
                    self.reply(ConfirmationCode::PacketReceiveError, &[]);
                }
            },
            PacketType::Data | PacketType::EndOfData => self.handle_data(packet),
            PacketType::Ack => {}
        }
    }

    fn handle_data(&mut self, packet: Packet) {
        let Some((buffer, mut received)) = self.download.take() else {
            trace!("Ignoring unsolicited data packet");
            return;
        };

        received.extend_from_slice(packet.payload());

        if packet.is_end_of_data() {
            debug!("Simulated sensor received {} template bytes", received.len());
            self.buffers[usize::from(buffer)] = Some(received.freeze());
        } else {
            self.download = Some((buffer, received));
        }
    }

    fn handle_command(&mut self, command: Command) {
        let instruction = command.instruction();
        self.log.push(instruction);

        if !self.online {
            return;
        }

        let scripted = self
            .scripts
            .get_mut(&instruction)
            .and_then(VecDeque::pop_front);

        match scripted {
            Some(SimReply::Silent) => return,
            Some(SimReply::Code(code)) if !code.is_ok() => {
                self.reply(code, &[]);
                return;
            }
            _ => {}
        }

        match command {
            Command::VfyPwd { password } => {
                let code = if password == self.password {
                    ConfirmationCode::Ok
                } else {
                    ConfirmationCode::PasswordFail
                };
                self.reply(code, &[]);
            }
            Command::ReadSysPara => {
                let params = self.info.to_bytes();
                self.reply(ConfirmationCode::Ok, &params);
            }
            Command::TempleteNum => {
                let count = self.library.len() as u16;
                self.reply(ConfirmationCode::Ok, &count.to_be_bytes());
            }
            Command::ReadIndexTable { page } => {
                let mut table = [0u8; (INDEX_PAGE_SLOTS / 8) as usize];
                let base = u32::from(page) * u32::from(INDEX_PAGE_SLOTS);

                for &id in self.library.keys() {
                    let offset = u32::from(id).wrapping_sub(base);
                    if offset < u32::from(INDEX_PAGE_SLOTS) {
                        table[(offset / 8) as usize] |= 1 << (offset % 8);
                    }
                }
                self.reply(ConfirmationCode::Ok, &table);
            }
            Command::GenImg => {
                self.image = self.finger.clone();
                let code = if self.image.is_some() {
                    ConfirmationCode::Ok
                } else {
                    ConfirmationCode::NoFinger
                };
                self.reply(code, &[]);
            }
            Command::Img2Tz { buffer } => match (self.image.clone(), self.buffer_index(buffer)) {
                (Some(image), Some(index)) => {
                    self.buffers[index] = Some(image);
                    self.reply(ConfirmationCode::Ok, &[]);
                }
                (None, _) => self.reply(ConfirmationCode::InvalidImage, &[]),
                (_, None) => self.reply(ConfirmationCode::InvalidRegister, &[]),
            },
            Command::Search {
                buffer,
                start_page,
                page_count,
            } => {
                let probe = self.buffer_index(buffer).and_then(|i| self.buffers[i].clone());
                let end = start_page.saturating_add(page_count);

                let hit = probe.and_then(|probe| {
                    self.library
                        .range(start_page..end)
                        .find(|(_, template)| **template == probe)
                        .map(|(&id, _)| id)
                });

                match hit {
                    Some(id) => {
                        let mut params = [0u8; 4];
                        params[..2].copy_from_slice(&id.to_be_bytes());
                        params[2..].copy_from_slice(&100u16.to_be_bytes());
                        self.reply(ConfirmationCode::Ok, &params);
                    }
                    None => self.reply(ConfirmationCode::NotFound, &[]),
                }
            }
            Command::RegModel => {
                let filled: Vec<&Bytes> = self.buffers.iter().flatten().collect();
                let agree = filled.windows(2).all(|pair| pair[0] == pair[1]);
                let model = filled.first().map(|&model| model.clone());

                match model {
                    Some(model) if agree => {
                        self.buffers[1] = Some(model);
                        self.reply(ConfirmationCode::Ok, &[]);
                    }
                    _ => self.reply(ConfirmationCode::EnrollMismatch, &[]),
                }
            }
            Command::Store { buffer, page_id } => {
                let template = self.buffer_index(buffer).and_then(|i| self.buffers[i].clone());

                if page_id == 0 || page_id > self.info.capacity {
                    self.reply(ConfirmationCode::BadLocation, &[]);
                } else if let Some(template) = template {
                    self.library.insert(page_id, template);
                    self.reply(ConfirmationCode::Ok, &[]);
                } else {
                    self.reply(ConfirmationCode::InvalidImage, &[]);
                }
            }
            Command::LoadChar { buffer, page_id } => {
                match (self.library.get(&page_id).cloned(), self.buffer_index(buffer)) {
                    (Some(template), Some(index)) => {
                        self.buffers[index] = Some(template);
                        self.reply(ConfirmationCode::Ok, &[]);
                    }
                    _ => self.reply(ConfirmationCode::DbReadFail, &[]),
                }
            }
            Command::UpChar { buffer } => {
                match self.buffer_index(buffer).and_then(|i| self.buffers[i].clone()) {
                    Some(template) => {
                        self.reply(ConfirmationCode::Ok, &[]);
                        self.stream_template(&template);
                    }
                    None => self.reply(ConfirmationCode::UploadFeatureFail, &[]),
                }
            }
            Command::DownChar { buffer } => {
                if self.buffer_index(buffer).is_some() {
                    self.download = Some((buffer, BytesMut::new()));
                    self.reply(ConfirmationCode::Ok, &[]);
                } else {
                    self.reply(ConfirmationCode::PacketResponseFail, &[]);
                }
            }
            Command::DeletChar { page_id, count } => {
                let end = page_id.saturating_add(count);
                self.library.retain(|&id, _| !(page_id..end).contains(&id));
                self.reply(ConfirmationCode::Ok, &[]);
            }
            Command::Empty => {
                self.library.clear();
                self.reply(ConfirmationCode::Ok, &[]);
            }
        }
    }

    fn buffer_index(&self, buffer: u8) -> Option<usize> {
        (1..=CHAR_BUFFER_COUNT)
            .contains(&buffer)
            .then_some(usize::from(buffer))
    }

    fn stream_template(&mut self, template: &Bytes) {
        let chunk_len = data_packet_len(self.info.packet_size_code);
        let chunks: Vec<&[u8]> = template.chunks(chunk_len).collect();
        let last = chunks.len().saturating_sub(1);

        for (i, chunk) in chunks.into_iter().enumerate() {
            if let Ok(packet) = Packet::data(self.info.address, chunk.to_vec(), i == last) {
                self.push_frame(&packet);
            }
        }
    }

    fn reply(&mut self, code: ConfirmationCode, params: &[u8]) {
        let mut payload = BytesMut::with_capacity(1 + params.len());
        payload.put_u8(code.into());
        payload.put_slice(params);

        if let Ok(packet) = Packet::new(self.info.address, PacketType::Ack, payload.freeze()) {
            self.push_frame(&packet);
        }
    }

    fn push_frame(&mut self, packet: &Packet) {
        let mut frame = packet.encode();

        if !self.noise.is_empty() {
            self.outbound.extend_from_slice(&self.noise);
            self.noise.clear();
        }

        match self.corrupt_in {
            Some(0) => {
                self.corrupt_in = None;
                if let Some(last) = frame.last_mut() {
                    *last ^= 0xFF;
                }
            }
            Some(n) => self.corrupt_in = Some(n - 1),
            None => {}
        }

        self.outbound.extend_from_slice(&frame);
    }
}

/// In-memory module speaking the framed protocol
///
/// # Examples
///
/// ```
/// use fpdoorbell::sim::{sample_template, SimulatedSensor};
///
/// let sim = SimulatedSensor::new().with_capacity(50);
/// let handle = sim.handle();
/// handle.store(1, sample_template(1));
/// handle.place_finger(sample_template(1));
/// ```
pub struct SimulatedSensor {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedSensor {
    /// Create an online module with an empty 200-slot library
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new())),
        }
    }

    /// Set library capacity
    pub fn with_capacity(self, capacity: u16) -> Self {
        self.state.lock().info.capacity = capacity;
        self
    }

    /// Set handshake password
    pub fn with_password(self, password: u32) -> Self {
        self.state.lock().password = password;
        self
    }

    /// Set module address
    pub fn with_address(self, address: u32) -> Self {
        self.state.lock().info.address = address;
        self
    }

    /// Set data packet size code (0-3)
    pub fn with_packet_size_code(self, code: u16) -> Self {
        self.state.lock().info.packet_size_code = code;
        self
    }

    /// Handle for scripting and inspecting the module
    pub fn handle(&self) -> SimHandle {
        SimHandle {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for SimulatedSensor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedSensor {
    async fn connect(&mut self) -> TransportResult<()> {
        self.state.lock().connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> TransportResult<()> {
        let mut state = self.state.lock();
        state.connected = false;
        state.outbound.clear();
        state.inbound.clear();
        state.download = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    async fn send(&mut self, data: &[u8]) -> TransportResult<()> {
        let mut state = self.state.lock();

        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        trace!("Simulated sensor <- {:02X?}", data);
        state.receive_frames(data);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> TransportResult<BytesMut> {
        {
            let mut state = self.state.lock();

            if !state.connected {
                return Err(TransportError::NotConnected);
            }

            if !state.outbound.is_empty() {
                let data = state.outbound.split();
                trace!("Simulated sensor -> {:02X?}", &data[..data.len().min(32)]);
                return Ok(data);
            }
        }

        tokio::time::sleep(timeout).await;
        Err(TransportError::ReadTimeout)
    }

    fn describe(&self) -> String {
        format!("simulated sensor @ 0x{:08X}", self.state.lock().info.address)
    }
}

/// Shared control surface of a [`SimulatedSensor`]
#[derive(Clone)]
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimHandle {
    /// Put a finger carrying `template` on the glass
    pub fn place_finger(&self, template: Bytes) {
        self.state.lock().finger = Some(template);
    }

    /// Take the finger off
    pub fn lift_finger(&self) {
        self.state.lock().finger = None;
    }

    /// Check if a finger is on the glass
    pub fn finger_present(&self) -> bool {
        self.state.lock().finger.is_some()
    }

    /// Write a template straight into the library
    pub fn store(&self, id: u16, template: Bytes) {
        self.state.lock().library.insert(id, template);
    }

    /// Template stored at `id`
    pub fn template(&self, id: u16) -> Option<Bytes> {
        self.state.lock().library.get(&id).cloned()
    }

    /// Occupied library slots
    pub fn stored_ids(&self) -> Vec<u16> {
        self.state.lock().library.keys().copied().collect()
    }

    /// Queue replies overriding the next commands of one instruction
    ///
    /// An `Ok` code falls through to the normal behaviour.
    pub fn script<I, R>(&self, instruction: Instruction, replies: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<SimReply>,
    {
        self.state
            .lock()
            .scripts
            .entry(instruction)
            .or_default()
            .extend(replies.into_iter().map(Into::into));
    }

    /// Make the module answer (`true`) or ignore every command (`false`)
    pub fn set_online(&self, online: bool) {
        self.state.lock().online = online;
    }

    /// Prepend garbage to the next reply frame
    pub fn inject_noise(&self, noise: &[u8]) {
        self.state.lock().noise.extend_from_slice(noise);
    }

    /// Flip the checksum of the next reply frame
    pub fn corrupt_next_reply(&self) {
        self.corrupt_frame(0);
    }

    /// Flip the checksum of the frame after the next `skip` frames
    pub fn corrupt_frame(&self, skip: usize) {
        self.state.lock().corrupt_in = Some(skip);
    }

    /// Every instruction received so far
    pub fn commands(&self) -> Vec<Instruction> {
        self.state.lock().log.clone()
    }

    /// How often `instruction` was received
    pub fn count(&self, instruction: Instruction) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|&&logged| logged == instruction)
            .count()
    }

    /// Forget the command log
    pub fn clear_commands(&self) {
        self.state.lock().log.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::DeviceLink;
    use pretty_assertions::assert_eq;

    async fn open_link(sim: SimulatedSensor) -> DeviceLink {
        let mut link = DeviceLink::new(sim);
        link.open().await.unwrap();
        link
    }

    #[test]
    fn test_sample_templates_differ() {
        assert_ne!(sample_template(1), sample_template(2));
        assert_eq!(sample_template(5), sample_template(5));
        assert_eq!(sample_template(5).len(), SIM_TEMPLATE_SIZE);
    }

    #[tokio::test]
    async fn test_answers_sys_para() {
        let mut link = open_link(SimulatedSensor::new().with_capacity(80)).await;

        let ack = link.transact(&Command::ReadSysPara).await.unwrap();
        let info = SensorInfo::parse(&ack.params).unwrap();

        assert_eq!(info.capacity, 80);
    }

    #[tokio::test]
    async fn test_scripted_reply_then_default() {
        let sim = SimulatedSensor::new();
        let handle = sim.handle();
        let mut link = open_link(sim).await;
        handle.script(Instruction::GenImg, [ConfirmationCode::ImageFail]);

        let first = link.transact(&Command::GenImg).await.unwrap();
        let second = link.transact(&Command::GenImg).await.unwrap();

        assert_eq!(first.code, ConfirmationCode::ImageFail);
        assert_eq!(second.code, ConfirmationCode::NoFinger);
        assert_eq!(handle.count(Instruction::GenImg), 2);
    }

    #[tokio::test]
    async fn test_up_char_streams_data_packets() {
        let sim = SimulatedSensor::new().with_packet_size_code(3);
        let handle = sim.handle();
        handle.store(4, sample_template(4));
        let mut link = open_link(sim).await;

        link.transact(&Command::LoadChar { buffer: 1, page_id: 4 }).await.unwrap();
        let ack = link.transact(&Command::UpChar { buffer: 1 }).await.unwrap();
        assert!(ack.is_ok());

        let mut received = Vec::new();
        loop {
            let packet = link.read_packet(Duration::from_secs(1)).await.unwrap();
            received.extend_from_slice(packet.payload());
            if packet.is_end_of_data() {
                break;
            }
        }

        assert_eq!(Bytes::from(received), sample_template(4));
    }

    #[tokio::test]
    async fn test_noise_before_reply() {
        let sim = SimulatedSensor::new();
        let handle = sim.handle();
        let mut link = open_link(sim).await;
        handle.inject_noise(&[0x00, 0xEF, 0x13]);

        let ack = link.transact(&Command::TempleteNum).await.unwrap();
        assert!(ack.is_ok());
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mut sim = SimulatedSensor::new();
        let result = sim.send(&[0xEF, 0x01]).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }
}
