//! Template transfer
//!
//! Moves raw templates between the module library and the host, for
//! backups and for cloning a library onto another module. A transfer runs
//! to completion, to its deadline, or to the first protocol error.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, info, warn};

use fpdoorbell_core::{
    constants::buffers, Command, PacketType, Session, SessionInfo,
};

use crate::config::DoorbellConfig;
use crate::error::{Error, Result};
use crate::sensor::Sensor;

/// Template download and upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateTransfer {
    timeout: Duration,
    min_size: usize,
    max_size: usize,
}

impl TemplateTransfer {
    /// 10 second deadline, templates of 512 to 4096 bytes
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            min_size: 512,
            max_size: 4096,
        }
    }

    /// Transfer using the limits of `config`
    pub fn from_config(config: &DoorbellConfig) -> Self {
        Self {
            timeout: config.transfer_timeout,
            min_size: config.min_template_size,
            max_size: config.max_template_size,
        }
    }

    /// Set overall deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set accepted template size range
    pub fn with_size_limits(mut self, min: usize, max: usize) -> Self {
        self.min_size = min;
        self.max_size = max;
        self
    }

    /// Read the template stored at `id`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - The session is not connected or `id` is out of range
    /// - The slot is empty (the module refuses `LoadChar`)
    /// - A frame is corrupt or of the wrong type
    /// - The deadline passes
    /// - The result is smaller than the minimum template size
    pub async fn download(&self, sensor: &mut Sensor, session: &Session, id: u16) -> Result<Bytes> {
        let info = connected(session)?;
        check_id(id, info.capacity)?;

        let template = self.bounded(self.receive(sensor, id)).await?;

        if template.len() < self.min_size {
            return Err(Error::TemplateTooSmall {
                size: template.len(),
                min: self.min_size,
            });
        }

        info!("Downloaded template {} ({} bytes)", id, template.len());
        Ok(template)
    }

    /// Write `template` to slot `id`, replacing what is there
    ///
    /// If storing at `id` fails, one more attempt goes to the first free
    /// slot. Returns the slot that took the template.
    pub async fn upload(
        &self,
        sensor: &mut Sensor,
        session: &Session,
        id: u16,
        template: &[u8],
    ) -> Result<u16> {
        let info = connected(session)?;
        check_id(id, info.capacity)?;

        if template.is_empty() || template.len() < self.min_size {
            return Err(Error::TemplateTooSmall {
                size: template.len(),
                min: self.min_size,
            });
        }
        if template.len() > self.max_size {
            return Err(Error::TemplateTooLarge {
                size: template.len(),
                max: self.max_size,
            });
        }

        let stored = self.bounded(self.send(sensor, info, id, template)).await?;

        info!("Uploaded template ({} bytes) to ID {}", template.len(), stored);
        Ok(stored)
    }

    async fn bounded<T>(&self, transfer: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, transfer)
            .await
            .map_err(|_| Error::TransferTimeout {
                seconds: self.timeout.as_secs(),
            })?
    }

    async fn receive(&self, sensor: &mut Sensor, id: u16) -> Result<Bytes> {
        sensor.load_model(buffers::PRIMARY, id).await?;
        sensor
            .expect_ok(Command::UpChar {
                buffer: buffers::PRIMARY,
            })
            .await?;

        let reply_timeout = sensor.link().timeout();
        let mut template = BytesMut::new();

        loop {
            let packet = sensor.link_mut().read_packet(reply_timeout).await?;
            let last = match packet.packet_type {
                PacketType::Data => false,
                PacketType::EndOfData => true,
                other => {
                    return Err(Error::UnexpectedPacket {
                        expected: PacketType::Data,
                        actual: other,
                    })
                }
            };

            template.extend_from_slice(packet.payload());

            if template.len() > self.max_size {
                return Err(Error::TemplateTooLarge {
                    size: template.len(),
                    max: self.max_size,
                });
            }
            if last {
                break;
            }
        }

        Ok(template.freeze())
    }

    async fn send(
        &self,
        sensor: &mut Sensor,
        info: SessionInfo,
        id: u16,
        template: &[u8],
    ) -> Result<u16> {
        sensor
            .expect_ok(Command::DownChar {
                buffer: buffers::PRIMARY,
            })
            .await?;

        let chunks: Vec<&[u8]> = template.chunks(info.packet_len.max(1)).collect();
        let last = chunks.len() - 1;

        for (i, chunk) in chunks.into_iter().enumerate() {
            sensor
                .link_mut()
                .send_data(Bytes::copy_from_slice(chunk), i == last)
                .await?;
        }
        debug!("Sent {} data packets", last + 1);

        sensor.delete_model(id).await?;

        match sensor.store_model(buffers::PRIMARY, id).await {
            Ok(()) => Ok(id),
            Err(e) => {
                warn!("Store at ID {} failed ({}), trying a free slot", id, e);

                let free = match sensor.free_slot(info.capacity).await {
                    Ok(Some(free)) => free,
                    Ok(None) => return Err(e),
                    Err(lookup) => {
                        warn!("Free slot lookup failed: {}", lookup);
                        return Err(e);
                    }
                };
                sensor.store_model(buffers::PRIMARY, free).await?;
                Ok(free)
            }
        }
    }
}

impl Default for TemplateTransfer {
    fn default() -> Self {
        Self::new()
    }
}

fn connected(session: &Session) -> Result<SessionInfo> {
    session.info().ok_or(Error::NotConnected)
}

pub(crate) fn check_id(id: u16, capacity: u16) -> Result<()> {
    if id == 0 || id > capacity {
        return Err(Error::InvalidTemplateId { id, capacity });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sample_template, SimHandle, SimReply, SimulatedSensor};
    use crate::supervisor::{Connection, ConnectionSupervisor};
    use fpdoorbell_core::{ConfirmationCode, Instruction};
    use pretty_assertions::assert_eq;

    async fn connected_sensor(sim: SimulatedSensor) -> (Sensor, Session, SimHandle) {
        let handle = sim.handle();
        let mut sensor = Sensor::new(sim);
        let session = Session::new();
        let mut supervisor = ConnectionSupervisor::new(session.clone());
        assert_eq!(supervisor.tick(&mut sensor).await, Connection::Connected);
        (sensor, session, handle)
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_stored_template() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.store(8, sample_template(8));

        let template = TemplateTransfer::new()
            .download(&mut sensor, &session, 8)
            .await
            .unwrap();

        assert_eq!(template, sample_template(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_is_repeatable() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.store(2, sample_template(2));
        let transfer = TemplateTransfer::new();

        let first = transfer.download(&mut sensor, &session, 2).await.unwrap();
        let second = transfer.download(&mut sensor, &session, 2).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_then_download_round_trip() {
        let sim = SimulatedSensor::new().with_packet_size_code(1);
        let (mut sensor, session, handle) = connected_sensor(sim).await;
        let transfer = TemplateTransfer::new();
        let blob = sample_template(42);

        let stored = transfer.upload(&mut sensor, &session, 5, &blob).await.unwrap();
        let back = transfer.download(&mut sensor, &session, 5).await.unwrap();

        assert_eq!(stored, 5);
        assert_eq!(back, blob);
        assert_eq!(handle.template(5), Some(blob));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_overwrites_slot() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.store(5, sample_template(1));

        let stored = TemplateTransfer::new()
            .upload(&mut sensor, &session, 5, &sample_template(2))
            .await
            .unwrap();

        assert_eq!(stored, 5);
        assert_eq!(handle.template(5), Some(sample_template(2)));
        assert_eq!(handle.count(Instruction::DeletChar), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_falls_back_to_free_slot() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.store(1, sample_template(1));
        handle.store(2, sample_template(2));
        handle.script(Instruction::Store, [ConfirmationCode::FlashError]);

        let stored = TemplateTransfer::new()
            .upload(&mut sensor, &session, 9, &sample_template(9))
            .await
            .unwrap();

        assert_eq!(stored, 3);
        assert_eq!(handle.template(3), Some(sample_template(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_fallback_failure_surfaces() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.script(
            Instruction::Store,
            [ConfirmationCode::FlashError, ConfirmationCode::FlashError],
        );

        let err = TemplateTransfer::new()
            .upload(&mut sensor, &session, 9, &sample_template(9))
            .await
            .unwrap_err();

        assert_eq!(err.confirmation_code(), Some(ConfirmationCode::FlashError));
    }

    #[tokio::test(start_paused = true)]
    async fn test_upload_keeps_store_error_when_index_unreadable() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.script(Instruction::Store, [ConfirmationCode::FlashError]);
        handle.script(Instruction::ReadIndexTable, [ConfirmationCode::PacketReceiveError]);

        let err = TemplateTransfer::new()
            .upload(&mut sensor, &session, 9, &sample_template(9))
            .await
            .unwrap_err();

        assert_eq!(err.confirmation_code(), Some(ConfirmationCode::FlashError));
        assert_eq!(handle.count(Instruction::Store), 1);
        assert_eq!(handle.template(9), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_empty_slot() {
        let (mut sensor, session, _handle) = connected_sensor(SimulatedSensor::new()).await;

        let err = TemplateTransfer::new()
            .download(&mut sensor, &session, 3)
            .await
            .unwrap_err();

        assert_eq!(err.confirmation_code(), Some(ConfirmationCode::DbReadFail));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_corrupt_data_packet_aborts() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.store(4, sample_template(4));
        // LoadChar ack, UpChar ack, then the first data packet
        handle.corrupt_frame(2);

        let err = TemplateTransfer::new()
            .download(&mut sensor, &session, 4)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            Error::Core(fpdoorbell_core::Error::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_download_deadline() {
        let (mut sensor, session, handle) = connected_sensor(SimulatedSensor::new()).await;
        handle.store(4, sample_template(4));
        handle.script(Instruction::UpChar, [SimReply::Silent]);

        let err = TemplateTransfer::new()
            .with_timeout(Duration::from_millis(500))
            .download(&mut sensor, &session, 4)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::TransferTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_and_id_validation() {
        let (mut sensor, session, _handle) = connected_sensor(SimulatedSensor::new()).await;
        let transfer = TemplateTransfer::new();

        let small = transfer.upload(&mut sensor, &session, 1, &[0u8; 100]).await;
        assert!(matches!(small, Err(Error::TemplateTooSmall { size: 100, min: 512 })));

        let large = transfer.upload(&mut sensor, &session, 1, &[0u8; 5000]).await;
        assert!(matches!(large, Err(Error::TemplateTooLarge { .. })));

        let bad_id = transfer.download(&mut sensor, &session, 0).await;
        assert!(matches!(bad_id, Err(Error::InvalidTemplateId { id: 0, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_requires_connection() {
        let mut sensor = Sensor::new(SimulatedSensor::new());

        let result = TemplateTransfer::new()
            .download(&mut sensor, &Session::new(), 1)
            .await;

        assert!(matches!(result, Err(Error::NotConnected)));
    }
}
