//! Acquisition session: handshake, streaming loop and control commands.
//!
//! An [`AcquisitionSession`] owns the serial link and one [`ScanDecoder`]. It
//! configures the instrument, then reacts to [`SessionCommand`]s while feeding
//! received bytes through the decoder and forwarding every completed
//! [`OutputRecord`] on a bounded channel.
//!
//! Commands are only applied between reads. The decoder has consumed every
//! complete pass by then, so a stop never splits a pass: leftover bytes of a
//! partial pass and any partial decimation cycle are discarded before the
//! stop command goes out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::decoder::{DecoderOptions, ScanDecoder};
use crate::error::{ConfigError, DaqResult, TransportError};
use crate::frame::OutputRecord;
use crate::profile::ModelProfile;
use crate::scan_list::ScanList;
use crate::serial::CommandLink;

/// Read buffer size for the streaming phase.
const READ_CHUNK: usize = 4096;

/// Control commands accepted by a running session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Begin streaming.
    Start,
    /// Stop streaming and discard undecoded bytes.
    Stop,
    /// Zero the counter channel.
    ResetCounter,
    /// Stop if needed and end the session.
    Quit,
}

impl SessionCommand {
    /// Map an interactive key to a command: `g`, `s`, `r`, `q`.
    pub fn from_key(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "g" | "go" | "start" => Some(Self::Start),
            "s" | "stop" => Some(Self::Stop),
            "r" | "reset" => Some(Self::ResetCounter),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Everything a session needs besides the port.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Channels to configure, in scan order.
    pub scan_list: ScanList,
    /// Decoder settings.
    pub options: DecoderOptions,
    /// Sample rate commands; the model defaults apply when `None`.
    pub rate_commands: Option<Vec<String>>,
    /// How long to wait for a command echo.
    pub response_timeout: Duration,
    /// Quiet period used to drain the port after a stop.
    pub settle_ms: u64,
}

impl SessionConfig {
    /// Defaults for a scan list: no decimation, model rate commands.
    pub fn new(scan_list: ScanList) -> Self {
        Self {
            scan_list,
            options: DecoderOptions::default(),
            rate_commands: None,
            response_timeout: Duration::from_millis(1000),
            settle_ms: 100,
        }
    }

    /// Set decoder options.
    pub fn options(mut self, options: DecoderOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the sample rate commands.
    pub fn rate_commands(mut self, commands: Vec<String>) -> Self {
        self.rate_commands = Some(commands);
        self
    }

    /// Set the response timeout.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Set the post-stop drain period.
    pub fn settle_ms(mut self, settle_ms: u64) -> Self {
        self.settle_ms = settle_ms;
        self
    }

    /// Configuration commands sent after the initial stop, in order.
    pub fn handshake_commands(&self) -> Vec<String> {
        let profile = self.scan_list.profile();
        let vocabulary = profile.commands();
        let mut commands = Vec::with_capacity(self.scan_list.len() + 6);

        commands.extend(vocabulary.binary_mode.map(str::to_string));
        commands.extend(vocabulary.packet_size.map(str::to_string));
        for (position, descriptor) in self.scan_list.iter().enumerate() {
            commands.push(format!(
                "{} {} {}",
                vocabulary.scan_entry, position, descriptor.raw_code
            ));
        }
        match &self.rate_commands {
            Some(rate) => commands.extend(rate.iter().cloned()),
            None => commands.extend(vocabulary.default_rate.iter().map(|c| c.to_string())),
        }
        if self.options.digital_inputs {
            commands.extend(vocabulary.digital_enable.map(str::to_string));
        }
        commands
    }
}

/// What a finished session did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Number of start commands acted on.
    pub acquisitions: u32,
    /// Complete passes demultiplexed.
    pub passes_decoded: u64,
    /// Records delivered to the consumer.
    pub records_emitted: u64,
    /// Bytes thrown away on stop, including drained stragglers.
    pub bytes_discarded: u64,
}

/// One configured instrument and its decode state.
#[derive(Debug)]
pub struct AcquisitionSession<P> {
    link: CommandLink<P>,
    decoder: ScanDecoder,
    config: SessionConfig,
    profile: ModelProfile,
    acquiring: bool,
    acquisitions: u32,
    drained: u64,
}

impl<P: AsyncRead + AsyncWrite + Unpin> AcquisitionSession<P> {
    /// Build the decoder and wrap the port. Configuration errors surface here.
    pub fn new(port: P, config: SessionConfig) -> Result<Self, ConfigError> {
        let decoder = ScanDecoder::new(config.scan_list.clone(), config.options)?;
        Ok(Self {
            link: CommandLink::new(port, config.response_timeout),
            profile: config.scan_list.profile(),
            decoder,
            config,
            acquiring: false,
            acquisitions: 0,
            drained: 0,
        })
    }

    /// Whether the instrument is streaming.
    pub fn is_acquiring(&self) -> bool {
        self.acquiring
    }

    /// Counters so far.
    pub fn summary(&self) -> SessionSummary {
        let stats = self.decoder.stats();
        SessionSummary {
            acquisitions: self.acquisitions,
            passes_decoded: stats.passes_decoded,
            records_emitted: stats.records_emitted,
            bytes_discarded: stats.bytes_discarded + self.drained,
        }
    }

    /// Stop any stale acquisition and configure the instrument.
    pub async fn handshake(&mut self) -> Result<(), TransportError> {
        let vocabulary = self.profile.commands();
        info!(
            model = %self.profile,
            channels = self.config.scan_list.len(),
            "Configuring instrument"
        );

        // The instrument may have been left streaming.
        self.link.send_no_reply(vocabulary.stop).await?;
        let stale = self.link.drain(self.config.settle_ms).await;
        if stale > 0 {
            debug!(bytes = stale, "Discarded output of a previous acquisition");
        }

        for command in self.config.handshake_commands() {
            self.link.send_command(&command).await?;
        }

        info!(
            model = %self.profile,
            record_width = self.decoder.record_width(),
            decimation = self.decoder.decimation_factor(),
            "Instrument ready"
        );
        Ok(())
    }

    /// Handshake, then stream until `Quit`, the command channel closes or the
    /// record consumer goes away.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        records: mpsc::Sender<OutputRecord>,
    ) -> DaqResult<SessionSummary> {
        self.handshake().await?;

        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let command = command.unwrap_or(SessionCommand::Quit);
                    if !self.apply(command).await? {
                        break;
                    }
                }
                read = self.link.read_chunk(&mut buf), if self.acquiring => {
                    let read = read.and_then(|n| match n {
                        0 => Err(TransportError::Closed),
                        n => Ok(n),
                    });
                    let n = match read {
                        Ok(n) => n,
                        Err(e) if e.is_disconnect() => {
                            warn!(error = %e, "Instrument disconnected, ending session");
                            return Err(e.into());
                        }
                        Err(e) => {
                            error!(error = %e, "Read failed, ending session");
                            return Err(e.into());
                        }
                    };
                    self.decoder.push_bytes(&buf[..n]);
                    if !self.forward_records(&records).await {
                        debug!("Record consumer dropped, quitting");
                        self.apply(SessionCommand::Quit).await?;
                        break;
                    }
                }
            }
        }

        let summary = self.summary();
        info!(
            passes = summary.passes_decoded,
            records = summary.records_emitted,
            discarded = summary.bytes_discarded,
            "Session finished"
        );
        Ok(summary)
    }

    async fn forward_records(&mut self, records: &mpsc::Sender<OutputRecord>) -> bool {
        while let Some(record) = self.decoder.next_record() {
            if records.send(record).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Act on one command. Returns `false` once the session should end.
    pub async fn apply(&mut self, command: SessionCommand) -> Result<bool, TransportError> {
        let vocabulary = self.profile.commands();
        match command {
            SessionCommand::Start => {
                if self.acquiring {
                    debug!("Already acquiring");
                    return Ok(true);
                }
                self.decoder.discard();
                self.link.send_no_reply(vocabulary.start).await?;
                self.acquiring = true;
                self.acquisitions += 1;
                info!(model = %self.profile, "Acquisition started");
            }
            SessionCommand::Stop => self.stop().await?,
            SessionCommand::ResetCounter => match vocabulary.reset_counter {
                Some(reset) if self.acquiring => self.link.send_no_reply(reset).await?,
                Some(reset) => {
                    self.link.send_command(reset).await?;
                }
                None => warn!(model = %self.profile, "Model has no counter channel to reset"),
            },
            SessionCommand::Quit => {
                self.stop().await?;
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn stop(&mut self) -> Result<(), TransportError> {
        if !self.acquiring {
            return Ok(());
        }
        let discarded = self.decoder.discard();
        self.link.send_no_reply(self.profile.commands().stop).await?;
        self.acquiring = false;
        self.drained += self.link.drain(self.config.settle_ms).await as u64;
        info!(discarded, "Acquisition stopped");
        Ok(())
    }

    /// Give back the port.
    pub fn into_inner(self) -> P {
        self.link.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_keys() {
        assert_eq!(SessionCommand::from_key("g"), Some(SessionCommand::Start));
        assert_eq!(SessionCommand::from_key("S\n"), Some(SessionCommand::Stop));
        assert_eq!(SessionCommand::from_key("r"), Some(SessionCommand::ResetCounter));
        assert_eq!(SessionCommand::from_key("q"), Some(SessionCommand::Quit));
        assert_eq!(SessionCommand::from_key("x"), None);
    }

    #[test]
    fn test_di2008_handshake_order() {
        let list = ScanList::build(&[0x0A00, 0x1303, 0x0709], ModelProfile::Di2008).unwrap();
        let commands = SessionConfig::new(list).handshake_commands();
        assert_eq!(
            commands,
            vec![
                "ps 0",
                "slist 0 2560",
                "slist 1 4867",
                "slist 2 1801",
                "dec 20",
                "srate 4"
            ]
        );
    }

    #[test]
    fn test_di245_handshake_with_digital_inputs() {
        let list = ScanList::build(&[0x0A00], ModelProfile::Di245).unwrap();
        let config = SessionConfig::new(list)
            .options(DecoderOptions::default().digital_inputs(true))
            .rate_commands(vec!["xrate 4451 10".into()]);
        assert_eq!(
            config.handshake_commands(),
            vec!["chn 0 2560", "xrate 4451 10", "dchn 1"]
        );
    }

    #[test]
    fn test_starter_kit_handshake() {
        let list = ScanList::build(&[0x0000, 0x0008], ModelProfile::Di2108).unwrap();
        assert_eq!(
            SessionConfig::new(list).handshake_commands(),
            vec![
                "encode 0",
                "ps 0",
                "slist 0 0",
                "slist 1 8",
                "dec 512",
                "srate 11718"
            ]
        );
    }

    #[test]
    fn test_reserved_gain_fails_before_io() {
        let list = ScanList::build(&[0x0600], ModelProfile::Di2008).unwrap();
        let (_host, device) = tokio::io::duplex(16);
        assert!(matches!(
            AcquisitionSession::new(device, SessionConfig::new(list)),
            Err(ConfigError::ReservedGainCode { .. })
        ));
    }
}
