//! WaveRunner remote commands over a message transport.
//!
//! [`LecroyScpiDriver`] turns the [`DsoDriver`] setters into remote commands
//! and reads scaled waveforms with `INSPECT?`, which returns amplitudes already
//! converted to volts. The transport only moves whole messages; two are
//! provided: [`VicpTransport`] (LeCroy VICP framing over TCP port 1861) and,
//! with the `instrument_visa` feature, `VisaTransport`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

use super::{DsoDriver, TimedWaveform};
use crate::error::{DsoError, DsoResult};
use crate::settings::{Channel, SampleMode, TriggerMode, TriggerSource};

/// Default VICP port of LeCroy oscilloscopes
pub const DEFAULT_PORT: u16 = 1861;

/// Default command timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

// =============================================================================
// Transport
// =============================================================================

/// Message-level transport to the instrument.
#[async_trait]
pub trait ScpiTransport: Send + Sync {
    /// Short tag naming the transport.
    fn transport_type(&self) -> &'static str;

    /// Send a command without expecting a response.
    async fn write(&self, command: &str) -> DsoResult<()>;

    /// Send a query and return the complete response, trimmed.
    async fn query(&self, query: &str) -> DsoResult<String>;

    /// Close the underlying connection.
    async fn close(&self) -> DsoResult<()> {
        Ok(())
    }
}

const VICP_DATA: u8 = 0x80;
const VICP_REMOTE: u8 = 0x40;
const VICP_EOI: u8 = 0x01;
const VICP_HEADER_VERSION: u8 = 0x01;
const VICP_HEADER_LEN: usize = 8;

struct VicpStream {
    stream: TcpStream,
    sequence: u8,
    /// Set while an exchange is on the wire. Still set on entry means the
    /// last exchange failed or was cancelled and its reply may be pending.
    in_flight: bool,
}

impl VicpStream {
    fn next_sequence(&mut self) -> u8 {
        // Sequence numbers run 1..=255; 0 is reserved.
        self.sequence = if self.sequence == u8::MAX {
            1
        } else {
            self.sequence + 1
        };
        self.sequence
    }
}

/// LeCroy VICP transport: every message is prefixed by an 8-byte header
/// carrying operation flags, a sequence number and the big-endian block length.
pub struct VicpTransport {
    inner: Mutex<VicpStream>,
    timeout: Duration,
    peer: String,
}

impl VicpTransport {
    /// Connect to `host:port`.
    pub async fn connect(host: &str, port: u16, io_timeout: Duration) -> DsoResult<Self> {
        let peer = format!("{}:{}", host, port);
        let stream = Self::open(&peer, io_timeout).await?;

        tracing::info!("Connected to VICP endpoint {}", peer);

        Ok(Self {
            inner: Mutex::new(VicpStream {
                stream,
                sequence: 0,
                in_flight: false,
            }),
            timeout: io_timeout,
            peer,
        })
    }

    async fn open(peer: &str, io_timeout: Duration) -> DsoResult<TcpStream> {
        let stream = timeout(io_timeout, TcpStream::connect(peer))
            .await
            .map_err(|_| DsoError::ConnectionUnavailable(format!("connection timeout to {peer}")))?
            .map_err(|e| DsoError::ConnectionUnavailable(format!("{peer}: {e}")))?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Replace the connection when the previous exchange did not complete, so
    /// its late reply is never read as the answer to a new query.
    async fn resync(&self, inner: &mut VicpStream) -> DsoResult<()> {
        if !inner.in_flight {
            return Ok(());
        }
        tracing::warn!(peer = %self.peer, "Previous VICP exchange incomplete, reconnecting");

        let _ = inner.stream.shutdown().await;
        inner.stream = Self::open(&self.peer, self.timeout).await?;
        inner.sequence = 0;
        inner.in_flight = false;
        Ok(())
    }

    fn header(operation: u8, sequence: u8, len: u32) -> [u8; VICP_HEADER_LEN] {
        let len = len.to_be_bytes();
        [
            operation,
            VICP_HEADER_VERSION,
            sequence,
            0,
            len[0],
            len[1],
            len[2],
            len[3],
        ]
    }

    async fn send(inner: &mut VicpStream, command: &str) -> std::io::Result<()> {
        let payload = command.as_bytes();
        let len = u32::try_from(payload.len()).map_err(|_| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "command too long")
        })?;
        let sequence = inner.next_sequence();
        let header = Self::header(VICP_DATA | VICP_REMOTE | VICP_EOI, sequence, len);

        inner.stream.write_all(&header).await?;
        inner.stream.write_all(payload).await?;
        inner.stream.flush().await
    }

    async fn receive(inner: &mut VicpStream) -> std::io::Result<Vec<u8>> {
        let mut message = Vec::new();
        loop {
            let mut header = [0u8; VICP_HEADER_LEN];
            inner.stream.read_exact(&mut header).await?;
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;

            let mut block = vec![0u8; len];
            inner.stream.read_exact(&mut block).await?;
            message.extend_from_slice(&block);

            if header[0] & VICP_EOI != 0 {
                return Ok(message);
            }
        }
    }
}

#[async_trait]
impl ScpiTransport for VicpTransport {
    fn transport_type(&self) -> &'static str {
        "vicp"
    }

    async fn write(&self, command: &str) -> DsoResult<()> {
        let mut inner = self.inner.lock().await;
        self.resync(&mut inner).await?;
        tracing::debug!(peer = %self.peer, "VICP write: {}", command);

        inner.in_flight = true;
        timeout(self.timeout, Self::send(&mut inner, command))
            .await
            .map_err(|_| DsoError::rejected(command, "write timed out"))?
            .map_err(|e| DsoError::rejected(command, e))?;
        inner.in_flight = false;
        Ok(())
    }

    async fn query(&self, query: &str) -> DsoResult<String> {
        let mut inner = self.inner.lock().await;
        self.resync(&mut inner).await?;
        tracing::debug!(peer = %self.peer, "VICP query: {}", query);

        inner.in_flight = true;
        timeout(self.timeout, Self::send(&mut inner, query))
            .await
            .map_err(|_| DsoError::rejected(query, "write timed out"))?
            .map_err(|e| DsoError::rejected(query, e))?;

        let bytes = timeout(self.timeout, Self::receive(&mut inner))
            .await
            .map_err(|_| DsoError::AcquisitionTimeout(self.timeout))?
            .map_err(|e| DsoError::rejected(query, e))?;
        inner.in_flight = false;

        let response = String::from_utf8_lossy(&bytes).trim().to_string();
        tracing::trace!("VICP response: {} bytes", response.len());
        Ok(response)
    }

    async fn close(&self) -> DsoResult<()> {
        let mut inner = self.inner.lock().await;
        inner.stream.shutdown().await?;
        tracing::info!("Closed VICP connection to {}", self.peer);
        Ok(())
    }
}

// =============================================================================
// LecroyScpiDriver
// =============================================================================

/// [`DsoDriver`] speaking the WaveRunner remote command set.
pub struct LecroyScpiDriver<T: ScpiTransport> {
    transport: T,
}

impl<T: ScpiTransport> LecroyScpiDriver<T> {
    /// Wrap a transport and switch response headers off so that queries return
    /// bare values.
    pub async fn connect(transport: T) -> DsoResult<Self> {
        let driver = Self { transport };
        driver.transport.write("COMM_HEADER OFF").await?;
        let idn = driver.identify().await?;
        tracing::info!("Oscilloscope identified as {}", idn);
        Ok(driver)
    }

    async fn inspect(&self, channel: Channel, block: &str) -> DsoResult<String> {
        self.transport
            .query(&format!("{}:INSPECT? \"{}\"", channel, block))
            .await
    }

    async fn horizontal(&self, channel: Channel, field: &str) -> DsoResult<f64> {
        let response = self.inspect(channel, field).await?;
        parse_inspect_scalar(&response).ok_or_else(|| {
            DsoError::rejected(
                format!("{channel}:INSPECT? \"{field}\""),
                format!("unparseable response {response:?}"),
            )
        })
    }
}

#[async_trait]
impl<T: ScpiTransport> DsoDriver for LecroyScpiDriver<T> {
    fn driver_type(&self) -> &'static str {
        self.transport.transport_type()
    }

    async fn identify(&self) -> DsoResult<String> {
        self.transport.query("*IDN?").await
    }

    async fn set_trigger_source(&self, source: TriggerSource) -> DsoResult<()> {
        self.transport
            .write(&format!("TRIG_SELECT EDGE,SR,{}", source.as_str()))
            .await
    }

    async fn set_trigger_mode(&self, mode: TriggerMode) -> DsoResult<()> {
        self.transport
            .write(&format!("TRIG_MODE {}", mode.as_str()))
            .await
    }

    async fn set_trigger_level(&self, source: TriggerSource, level: f64) -> DsoResult<()> {
        self.transport
            .write(&format!("{}:TRIG_LEVEL {}", source.as_str(), level))
            .await
    }

    async fn set_ver_scale(&self, channel: Channel, volts_per_div: f64) -> DsoResult<()> {
        self.transport
            .write(&format!("{}:VOLT_DIV {}", channel, volts_per_div))
            .await
    }

    async fn set_ver_offset(&self, channel: Channel, offset: f64) -> DsoResult<()> {
        self.transport
            .write(&format!("{}:OFFSET {}", channel, offset))
            .await
    }

    async fn set_hor_offset(&self, seconds: f64) -> DsoResult<()> {
        self.transport
            .write(&format!(
                "VBS 'app.Acquisition.Horizontal.HorOffset = {}'",
                seconds
            ))
            .await
    }

    async fn set_sample_mode(&self, mode: SampleMode) -> DsoResult<()> {
        let command = match mode {
            SampleMode::RealTime => "SEQUENCE OFF".to_string(),
            SampleMode::Sequence(segments) => format!("SEQUENCE ON,{}", segments),
        };
        self.transport.write(&command).await
    }

    async fn clear_sweeps(&self) -> DsoResult<()> {
        self.transport.write("CLEAR_SWEEPS").await
    }

    async fn write(&self, command: &str) -> DsoResult<()> {
        self.transport.write(command).await
    }

    async fn scaled_waveform_with_times(&self, channel: Channel) -> DsoResult<TimedWaveform> {
        let values = self.scaled_waveform(channel).await?;
        let interval = self.horizontal(channel, "HORIZ_INTERVAL").await?;
        let offset = self.horizontal(channel, "HORIZ_OFFSET").await?;

        let times = (0..values.len())
            .map(|i| offset + interval * i as f64)
            .collect();
        Ok(TimedWaveform { times, values })
    }

    async fn scaled_waveform(&self, channel: Channel) -> DsoResult<Vec<f64>> {
        let response = self.inspect(channel, "SIMPLE").await?;
        parse_inspect_values(&response).map_err(|token| {
            DsoError::rejected(
                format!("{channel}:INSPECT? \"SIMPLE\""),
                format!("non-numeric sample {token:?}"),
            )
        })
    }

    async fn disconnect(&self) -> DsoResult<()> {
        self.transport.close().await
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// Size of one blocking read when collecting a message.
const READ_CHUNK: usize = 64 * 1024;

/// Read one complete message from a blocking reader, trimmed.
///
/// A VISA read fills the whole buffer while more of the message is pending and
/// returns short once the END indicator arrives, so multi-line responses such
/// as `INSPECT?` blocks are read in full.
#[cfg_attr(not(feature = "instrument_visa"), allow(dead_code))]
pub(crate) fn read_message<R: std::io::Read>(mut reader: R) -> std::io::Result<String> {
    let mut message = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    loop {
        let n = reader.read(&mut chunk)?;
        message.extend_from_slice(&chunk[..n]);
        if n < chunk.len() {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&message).trim().to_string())
}

/// Parse the sample block of an `INSPECT? "SIMPLE"` response.
///
/// The block is a quoted, whitespace-separated list of values. On failure the
/// offending token is returned.
pub fn parse_inspect_values(response: &str) -> Result<Vec<f64>, String> {
    response
        .trim()
        .trim_matches('"')
        .split_whitespace()
        .map(|token| token.parse::<f64>().map_err(|_| token.to_string()))
        .collect()
}

/// Parse a single-field `INSPECT?` response such as
/// `"HORIZ_INTERVAL     : 1.0000e-10   "`.
pub fn parse_inspect_scalar(response: &str) -> Option<f64> {
    let body = response.trim().trim_matches('"');
    let value = body.rsplit_once(':').map_or(body, |(_, v)| v);
    value.trim().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use tokio::net::TcpListener;

    /// Transport answering queries from a table and recording writes.
    #[derive(Default)]
    struct ScriptedTransport {
        responses: HashMap<String, String>,
        written: StdMutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn with_response(mut self, query: &str, response: &str) -> Self {
            self.responses.insert(query.into(), response.into());
            self
        }
    }

    #[async_trait]
    impl<'a> ScpiTransport for &'a ScriptedTransport {
        fn transport_type(&self) -> &'static str {
            "scripted"
        }

        async fn write(&self, command: &str) -> DsoResult<()> {
            self.written.lock().unwrap().push(command.to_string());
            Ok(())
        }

        async fn query(&self, query: &str) -> DsoResult<String> {
            self.responses
                .get(query)
                .cloned()
                .ok_or_else(|| DsoError::rejected(query, "no scripted response"))
        }
    }

    fn scripted() -> ScriptedTransport {
        ScriptedTransport::default()
            .with_response("*IDN?", "LECROY,WAVERUNNER8104,LCRY0001,9.6.0")
            .with_response("C1:INSPECT? \"SIMPLE\"", "\"  0.1  0.2 -0.3  \"")
            .with_response(
                "C1:INSPECT? \"HORIZ_INTERVAL\"",
                "\"HORIZ_INTERVAL     : 1.0000e-09   \"",
            )
            .with_response(
                "C1:INSPECT? \"HORIZ_OFFSET\"",
                "\"HORIZ_OFFSET       : -5.0000e-09  \"",
            )
            .with_response("C2:INSPECT? \"SIMPLE\"", "\" 1.0 oops \"")
    }

    #[test]
    fn parses_simple_block() {
        let values = parse_inspect_values("\"  1.5e-3 -2.0\r\n 3 \"").unwrap();
        assert_eq!(values, vec![1.5e-3, -2.0, 3.0]);
        assert_eq!(parse_inspect_values("\"1 x\"").unwrap_err(), "x");
        assert!(parse_inspect_values("\"\"").unwrap().is_empty());
    }

    #[test]
    fn parses_scalar_fields() {
        assert_eq!(
            parse_inspect_scalar("\"HORIZ_INTERVAL     : 2.5e-10   \""),
            Some(2.5e-10)
        );
        assert_eq!(parse_inspect_scalar("4e-9"), Some(4e-9));
        assert_eq!(parse_inspect_scalar("\"HORIZ_OFFSET : n/a\""), None);
    }

    #[test]
    fn read_message_keeps_every_line() {
        let mut reply = std::io::Cursor::new(b"\"0.1 0.2\r\n0.3 0.4\r\n\"\n".to_vec());

        let message = read_message(&mut reply).unwrap();
        assert_eq!(parse_inspect_values(&message).unwrap(), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(reply.position(), reply.get_ref().len() as u64);
    }

    #[test]
    fn read_message_spans_several_reads() {
        let samples: Vec<String> = (0..20_000).map(|i| format!("{i}.5")).collect();
        let body = format!("\"{}\"", samples.join("\r\n"));
        assert!(body.len() > READ_CHUNK);

        let message = read_message(std::io::Cursor::new(body.clone().into_bytes())).unwrap();
        assert_eq!(message, body);
        assert_eq!(parse_inspect_values(&message).unwrap().len(), 20_000);
    }

    #[tokio::test]
    async fn setters_issue_remote_commands() {
        let transport = scripted();
        let driver = LecroyScpiDriver::connect(&transport).await.unwrap();

        driver.set_trigger_source(TriggerSource::Ext).await.unwrap();
        driver.set_trigger_mode(TriggerMode::Stopped).await.unwrap();
        driver
            .set_trigger_level(TriggerSource::C2, 0.25)
            .await
            .unwrap();
        driver.set_ver_scale(Channel::C3, 0.5).await.unwrap();
        driver.set_ver_offset(Channel::C4, -0.1).await.unwrap();
        driver.set_sample_mode(SampleMode::Sequence(3)).await.unwrap();
        driver.set_sample_mode(SampleMode::RealTime).await.unwrap();
        driver.clear_sweeps().await.unwrap();

        let written = transport.written.lock().unwrap().clone();
        assert_eq!(
            written,
            vec![
                "COMM_HEADER OFF",
                "TRIG_SELECT EDGE,SR,EX",
                "TRIG_MODE STOP",
                "C2:TRIG_LEVEL 0.25",
                "C3:VOLT_DIV 0.5",
                "C4:OFFSET -0.1",
                "SEQUENCE ON,3",
                "SEQUENCE OFF",
                "CLEAR_SWEEPS",
            ]
        );
    }

    #[tokio::test]
    async fn waveform_with_times_builds_time_vector() {
        let transport = scripted();
        let driver = LecroyScpiDriver::connect(&transport).await.unwrap();

        let wf = driver.scaled_waveform_with_times(Channel::C1).await.unwrap();
        assert_eq!(wf.values, vec![0.1, 0.2, -0.3]);
        assert_eq!(wf.times.len(), 3);
        assert!((wf.times[0] + 5e-9).abs() < 1e-18);
        assert!((wf.times[2] + 3e-9).abs() < 1e-18);
    }

    #[tokio::test]
    async fn malformed_waveform_is_rejected() {
        let transport = scripted();
        let driver = LecroyScpiDriver::connect(&transport).await.unwrap();

        let err = driver.scaled_waveform(Channel::C2).await.unwrap_err();
        assert!(matches!(err, DsoError::CommandRejected { .. }));
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn vicp_header_layout() {
        let header = VicpTransport::header(VICP_DATA | VICP_EOI, 7, 0x0102_0304);
        assert_eq!(header, [0x81, 0x01, 7, 0, 0x01, 0x02, 0x03, 0x04]);
    }

    #[tokio::test]
    async fn vicp_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut header = [0u8; VICP_HEADER_LEN];
            socket.read_exact(&mut header).await.unwrap();
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            socket.read_exact(&mut body).await.unwrap();
            assert_eq!(body, b"*IDN?");
            assert_eq!(header[2], 1);

            // Answer in two blocks; only the second carries EOI.
            for (flags, chunk) in [(VICP_DATA, &b"LECROY,"[..]), (VICP_DATA | VICP_EOI, &b"WR8K\n"[..])] {
                let header = VicpTransport::header(flags, 1, chunk.len() as u32);
                socket.write_all(&header).await.unwrap();
                socket.write_all(chunk).await.unwrap();
            }
        });

        let transport = VicpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();
        let idn = transport.query("*IDN?").await.unwrap();
        assert_eq!(idn, "LECROY,WR8K");

        server.await.unwrap();
    }

    /// Answer every message on `socket` with "answer to <message>" after
    /// `delay`, until the peer goes away.
    async fn answer_queries(mut socket: TcpStream, delay: Duration) {
        loop {
            let mut header = [0u8; VICP_HEADER_LEN];
            if socket.read_exact(&mut header).await.is_err() {
                return;
            }
            let len = u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            let mut body = vec![0u8; len];
            if socket.read_exact(&mut body).await.is_err() {
                return;
            }

            tokio::time::sleep(delay).await;
            let reply = format!("answer to {}", String::from_utf8_lossy(&body));
            let reply_header =
                VicpTransport::header(VICP_DATA | VICP_EOI, header[2], reply.len() as u32);
            if socket.write_all(&reply_header).await.is_err()
                || socket.write_all(reply.as_bytes()).await.is_err()
            {
                return;
            }
        }
    }

    /// VICP endpoint whose first connection answers after `first_delay`;
    /// later connections answer at once.
    async fn slow_first_endpoint(first_delay: Duration) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let mut delay = first_delay;
            while let Ok((socket, _)) = listener.accept().await {
                tokio::spawn(answer_queries(socket, delay));
                delay = Duration::ZERO;
            }
        });
        port
    }

    #[tokio::test]
    async fn late_reply_is_not_returned_after_timeout() {
        let port = slow_first_endpoint(Duration::from_millis(300)).await;
        let transport = VicpTransport::connect("127.0.0.1", port, Duration::from_millis(100))
            .await
            .unwrap();

        let err = transport.query("C1:INSPECT? \"SIMPLE\"").await.unwrap_err();
        assert!(matches!(err, DsoError::AcquisitionTimeout(_)));

        let reply = transport.query("C2:INSPECT? \"SIMPLE\"").await.unwrap();
        assert_eq!(reply, "answer to C2:INSPECT? \"SIMPLE\"");
    }

    #[tokio::test]
    async fn cancelled_query_does_not_desync_the_next() {
        let port = slow_first_endpoint(Duration::from_millis(300)).await;
        let transport = VicpTransport::connect("127.0.0.1", port, Duration::from_secs(2))
            .await
            .unwrap();

        let slow = transport.query("C1:INSPECT? \"SIMPLE\"");
        let cancelled = tokio::time::timeout(Duration::from_millis(50), slow).await;
        assert!(cancelled.is_err());

        let reply = transport.query("C2:INSPECT? \"SIMPLE\"").await.unwrap();
        assert_eq!(reply, "answer to C2:INSPECT? \"SIMPLE\"");

        // The fresh connection stays in step.
        let reply = transport.query("C3:INSPECT? \"SIMPLE\"").await.unwrap();
        assert_eq!(reply, "answer to C3:INSPECT? \"SIMPLE\"");
    }
}
