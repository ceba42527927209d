//! High-level sensor interface

use std::time::Duration;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use tracing::{debug, info, trace};

use fpdoorbell_core::{
    constants::{DEFAULT_PASSWORD, INDEX_PAGE_SLOTS},
    Command, ConfirmationCode, Instruction,
};
use fpdoorbell_transport::Transport;
use fpdoorbell_types::SensorInfo;

use crate::error::{Error, Result};
use crate::link::{Ack, DeviceLink};

/// Reply to a library search
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The buffer matched a stored template
    Found { id: u16, confidence: u16 },

    /// Nothing in the searched range matched
    NotFound,
}

/// R502/R503 fingerprint module
///
/// Typed commands over a [`DeviceLink`]. Every command flushes stale bytes
/// first and performs exactly one request/reply exchange.
///
/// # Examples
///
/// ```no_run
/// use fpdoorbell::Sensor;
/// use fpdoorbell_transport::TcpTransport;
///
/// #[tokio::main]
/// async fn main() -> fpdoorbell::Result<()> {
///     let mut sensor = Sensor::new(TcpTransport::new("192.168.1.40", 2000));
///
///     let (info, stored) = sensor.handshake().await?;
///     println!("{} with {} templates", info, stored);
///
///     sensor.close().await?;
///     Ok(())
/// }
/// ```
pub struct Sensor {
    link: DeviceLink,
    password: u32,
}

impl Sensor {
    /// Create a sensor at the factory default address and password
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self::from_link(DeviceLink::new(transport))
    }

    /// Wrap an already configured link
    pub fn from_link(link: DeviceLink) -> Self {
        Self {
            link,
            password: DEFAULT_PASSWORD,
        }
    }

    /// Set handshake password (default: 0)
    pub fn with_password(mut self, password: u32) -> Self {
        self.password = password;
        self
    }

    /// Set reply timeout
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            link: self.link.with_timeout(timeout),
            ..self
        }
    }

    /// Underlying link
    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    /// Underlying link, for multi-packet exchanges
    pub fn link_mut(&mut self) -> &mut DeviceLink {
        &mut self.link
    }

    /// Exchanges in a row that got no reply
    pub fn consecutive_failures(&self) -> u32 {
        self.link.consecutive_failures()
    }

    /// Open the transport if it is not open yet
    pub async fn open(&mut self) -> Result<()> {
        self.link.open().await
    }

    /// Close the transport
    pub async fn close(&mut self) -> Result<()> {
        info!("Closing sensor link");
        self.link.close().await
    }

    /// Open the link, verify the password and read the module facts
    ///
    /// Returns the system parameters and the stored template count.
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The transport cannot be opened
    /// - The module does not answer
    /// - The password is rejected
    pub async fn handshake(&mut self) -> Result<(SensorInfo, u16)> {
        self.open().await?;
        self.verify_password().await?;

        let info = self.read_system_parameters().await?;
        let count = self.template_count().await?;

        info!("Handshake complete: {} ({} stored)", info, count);
        Ok((info, count))
    }

    /// Flush, send `command` and return its acknowledge packet
    pub async fn execute(&mut self, command: Command) -> Result<Ack> {
        self.link.flush().await?;
        self.link.transact(&command).await
    }

    /// Execute a command that must succeed, returning its reply parameters
    pub async fn expect_ok(&mut self, command: Command) -> Result<Bytes> {
        let instruction = command.instruction();
        let ack = self.execute(command).await?;

        if ack.is_ok() {
            Ok(ack.params)
        } else {
            Err(Error::sensor(instruction, ack.code))
        }
    }

    /// Verify the handshake password
    pub async fn verify_password(&mut self) -> Result<()> {
        self.expect_ok(Command::VfyPwd {
            password: self.password,
        })
        .await?;
        Ok(())
    }

    /// Read the system parameter block
    pub async fn read_system_parameters(&mut self) -> Result<SensorInfo> {
        let params = self.expect_ok(Command::ReadSysPara).await?;
        let info = SensorInfo::parse(&params)?;

        debug!("System parameters: {:?}", info);
        Ok(info)
    }

    /// Number of templates in the library
    pub async fn template_count(&mut self) -> Result<u16> {
        let params = self.expect_ok(Command::TempleteNum).await?;
        read_word(&params, 0, Instruction::TempleteNum)
    }

    /// Capture an image; `NoFinger` is a normal reply
    pub async fn capture_image(&mut self) -> Result<ConfirmationCode> {
        Ok(self.execute(Command::GenImg).await?.code)
    }

    /// Extract features from the image into `buffer`
    pub async fn image_to_template(&mut self, buffer: u8) -> Result<ConfirmationCode> {
        Ok(self.execute(Command::Img2Tz { buffer }).await?.code)
    }

    /// Search slots `1..=capacity` for the contents of `buffer`
    ///
    /// # Errors
    ///
    /// Any confirmation code other than a hit or a miss is returned as
    /// [`Error::Sensor`].
    pub async fn search(&mut self, buffer: u8, capacity: u16) -> Result<SearchResult> {
        let ack = self
            .execute(Command::Search {
                buffer,
                start_page: 1,
                page_count: capacity,
            })
            .await?;

        match ack.code {
            ConfirmationCode::Ok => {
                let id = read_word(&ack.params, 0, Instruction::Search)?;
                let confidence = read_word(&ack.params, 2, Instruction::Search)?;
                Ok(SearchResult::Found { id, confidence })
            }
            ConfirmationCode::NotFound | ConfirmationCode::NoMatch => Ok(SearchResult::NotFound),
            code => Err(Error::sensor(Instruction::Search, code)),
        }
    }

    /// Merge the character buffers into a model
    pub async fn create_model(&mut self) -> Result<ConfirmationCode> {
        Ok(self.execute(Command::RegModel).await?.code)
    }

    /// Store `buffer` at library slot `id`
    pub async fn store_model(&mut self, buffer: u8, id: u16) -> Result<()> {
        self.expect_ok(Command::Store {
            buffer,
            page_id: id,
        })
        .await?;
        Ok(())
    }

    /// Load library slot `id` into `buffer`
    pub async fn load_model(&mut self, buffer: u8, id: u16) -> Result<()> {
        self.expect_ok(Command::LoadChar {
            buffer,
            page_id: id,
        })
        .await?;
        Ok(())
    }

    /// Delete the template at `id`
    pub async fn delete_model(&mut self, id: u16) -> Result<()> {
        self.expect_ok(Command::DeletChar {
            page_id: id,
            count: 1,
        })
        .await?;
        Ok(())
    }

    /// Delete every template
    pub async fn empty_library(&mut self) -> Result<()> {
        self.expect_ok(Command::Empty).await?;
        Ok(())
    }

    /// Occupancy bitmap of one index page (256 slots, LSB first)
    pub async fn read_index_table(&mut self, page: u8) -> Result<Bytes> {
        let table = self.expect_ok(Command::ReadIndexTable { page }).await?;

        if table.len() < usize::from(INDEX_PAGE_SLOTS / 8) {
            return Err(Error::InvalidResponse(format!(
                "index table page {} has {} bytes",
                page,
                table.len()
            )));
        }

        trace!("Index page {}: {:02X?}", page, &table[..]);
        Ok(table)
    }

    /// Lowest unused id in `1..=capacity`
    pub async fn free_slot(&mut self, capacity: u16) -> Result<Option<u16>> {
        let last_page = capacity / INDEX_PAGE_SLOTS;

        for page in 0..=last_page {
            let table = self.read_index_table(page as u8).await?;
            let base = page * INDEX_PAGE_SLOTS;

            let free = (0..INDEX_PAGE_SLOTS)
                .map(|offset| (offset, base + offset))
                .filter(|&(_, id)| (1..=capacity).contains(&id))
                .find(|&(offset, _)| {
                    let byte = table[usize::from(offset / 8)];
                    byte & (1 << (offset % 8)) == 0
                });

            if let Some((_, id)) = free {
                return Ok(Some(id));
            }
        }

        Ok(None)
    }
}

fn read_word(params: &[u8], offset: usize, instruction: Instruction) -> Result<u16> {
    params
        .get(offset..offset + 2)
        .map(BigEndian::read_u16)
        .ok_or_else(|| Error::InvalidResponse(format!("{} reply too short", instruction)))
}
