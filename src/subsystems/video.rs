//! # Video subsystem
//!
//! The drone exposes its camera stream over UDP, but which addressing actually delivers packets depends on the host
//! network setup. Acquisition is therefore done in two steps:
//!  - The [StreamResolver] tries an ordered list of [StreamEndpoint] candidates. Each one is opened and must produce
//!    one non-empty frame within the probe timeout. The first that does is committed, every other opened source is
//!    released on the spot.
//!  - The [AcquisitionLoop] then pulls frames from the committed source until it is stopped. Read failures are
//!    counted and backed off, the feed is reported as degraded after a number of consecutive failures but the loop
//!    never gives up on its own. When no candidate works the loop switches to the [FallbackCapture] strategy.
//!
//! The drone sends H.264. The [UdpCaptureBackend] decodes it to RGB with a [DecodingSource] so that the frames handed
//! to the vision subsystem can be analyzed. The most recent frame is handed to the rest of the system through a
//! [Latest] slot, see [Video].
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::sync::atomic::AtomicBool;
//! # use tello_copilot::config::VideoConfig;
//! # use tello_copilot::latest::Latest;
//! # use tello_copilot::subsystems::events;
//! # use tello_copilot::subsystems::video::{AcquisitionLoop, UdpCaptureBackend};
//! # async fn test() -> tello_copilot::Result<()> {
//! let (sink, _events) = events::channel(16);
//! let frames = Latest::new();
//! let stop = Arc::new(AtomicBool::new(false));
//!
//! let acquisition = AcquisitionLoop::new(&VideoConfig::default(), Arc::new(UdpCaptureBackend::new()), sink)?;
//! let final_state = acquisition.run(frames.clone(), stop).await;
//! println!("Video stopped after {} frames", final_state.frames);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local};
use log::{debug, error, info, warn};
use openh264::decoder::Decoder;
use openh264::formats::YUVSource;
use openh264::nal_units;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::config::VideoConfig;
use crate::latest::Latest;
use crate::subsystems::events::{Event, EventSink};
use crate::transport::MotionTransport;
use crate::{Error, Result};

/// Payload size of a full video datagram, a shorter datagram ends a frame
pub const UDP_PAYLOAD_SIZE: usize = 1460;
const MAX_FRAME_SIZE: usize = 2 * 1024 * 1024;

/// # Stream endpoint descriptor
///
/// Two URI forms are understood:
///  - `udp://<host>:<port>` binds `<port>` on all interfaces and only accepts datagrams sent by `<host>`. An
///    unspecified host (`0.0.0.0`) accepts every sender.
///  - `udp://@<host>:<port>` binds `<host>:<port>` locally and accepts every sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    uri: String,
    bind: SocketAddr,
    source: Option<IpAddr>,
}

impl StreamEndpoint {
    /// Local address the capture socket binds to
    pub fn bind_addr(&self) -> SocketAddr {
        self.bind
    }

    /// Sender datagrams are accepted from, `None` for any
    pub fn source(&self) -> Option<IpAddr> {
        self.source
    }
}

impl FromStr for StreamEndpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::ConfigError(format!("invalid stream endpoint {:?}", s));

        let address = s.trim().strip_prefix("udp://").ok_or_else(invalid)?;
        let (listen, address) = match address.strip_prefix('@') {
            Some(address) => (true, address),
            None => (false, address),
        };
        let address: SocketAddr = address.parse().map_err(|_| invalid())?;

        let (bind, source) = if listen {
            (address, None)
        } else {
            let any = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), address.port());
            let source = Some(address.ip()).filter(|ip| !ip.is_unspecified());
            (any, source)
        };

        Ok(Self {
            uri: s.trim().to_owned(),
            bind,
            source,
        })
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.uri)
    }
}

/// Encoding of the bytes carried by a [Frame]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// Raw H.264 access units, as sent by the drone
    H264,
    Jpeg,
    /// Packed 8-bit RGB pixels
    Rgb24 { width: u32, height: u32 },
}

/// # Video frame
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub format: FrameFormat,
    pub data: Vec<u8>,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(format: FrameFormat, data: Vec<u8>) -> Self {
        Self {
            format,
            data,
            captured_at: Local::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// # Open capture handle
///
/// `read_frame()` returns `Ok(Some(frame))` when a frame was read, `Ok(None)` when none is available yet and an
/// error on a failed read. `release()` closes the underlying resource and must be idempotent.
#[async_trait]
pub trait FrameSource: Send {
    async fn read_frame(&mut self) -> Result<Option<Frame>>;

    fn release(&mut self);
}

/// # Primary capture strategy
///
/// Opens a [FrameSource] for a given stream endpoint.
#[async_trait]
pub trait CaptureBackend: Send + Sync {
    async fn open(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameSource>>;
}

/// # Secondary capture strategy
///
/// Used when none of the stream endpoints delivers frames.
#[async_trait]
pub trait FallbackCapture: Send + Sync {
    async fn open_fallback(&self) -> Result<Box<dyn FrameSource>>;
}

/// Receiver of the acquired frames
pub trait FrameSink: Send {
    fn forward(&mut self, frame: Arc<Frame>);
}

impl FrameSink for Latest<Frame> {
    fn forward(&mut self, frame: Arc<Frame>) {
        self.publish_arc(frame);
    }
}

impl FrameSink for flume::Sender<Arc<Frame>> {
    fn forward(&mut self, frame: Arc<Frame>) {
        let _ = self.send(frame);
    }
}

/// Releases the wrapped source when dropped, whatever the exit path
struct SourceGuard(Box<dyn FrameSource>);

impl SourceGuard {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        self.0.read_frame().await
    }
}

impl Drop for SourceGuard {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// # UDP capture backend
///
/// Binds the endpoint address and reassembles the datagrams sent by the drone into H.264 access units: full
/// datagrams ([UDP_PAYLOAD_SIZE] bytes) are accumulated, a shorter one closes the unit. Access units are decoded to
/// [FrameFormat::Rgb24] frames, unless the backend was built with [UdpCaptureBackend::raw()].
#[derive(Debug)]
pub struct UdpCaptureBackend {
    decode: bool,
}

impl Default for UdpCaptureBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl UdpCaptureBackend {
    pub fn new() -> Self {
        Self { decode: true }
    }

    /// Deliver the reassembled H.264 access units without decoding them
    pub fn raw() -> Self {
        Self { decode: false }
    }
}

#[async_trait]
impl CaptureBackend for UdpCaptureBackend {
    async fn open(&self, endpoint: &StreamEndpoint) -> Result<Box<dyn FrameSource>> {
        let socket = UdpSocket::bind(endpoint.bind_addr()).await?;
        debug!("Bound video socket on {} for {}", endpoint.bind_addr(), endpoint);

        let source = Box::new(UdpFrameSource {
            socket: Some(socket),
            source: endpoint.source(),
            pending: Vec::new(),
        });

        if self.decode {
            Ok(Box::new(DecodingSource::new(source)?))
        } else {
            Ok(source)
        }
    }
}

struct UdpFrameSource {
    socket: Option<UdpSocket>,
    source: Option<IpAddr>,
    pending: Vec<u8>,
}

#[async_trait]
impl FrameSource for UdpFrameSource {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let socket = self
            .socket
            .as_ref()
            .ok_or_else(|| Error::CaptureError("socket released".to_owned()))?;
        let mut datagram = [0u8; 2048];

        loop {
            // recv_from() is cancel safe, a partially assembled frame survives a read timeout in `pending`
            let (len, from) = socket.recv_from(&mut datagram).await?;
            if matches!(self.source, Some(source) if source != from.ip()) {
                continue;
            }

            self.pending.extend_from_slice(&datagram[..len]);
            if self.pending.len() > MAX_FRAME_SIZE {
                debug!("Dropping oversized video frame ({} bytes)", self.pending.len());
                self.pending.clear();
                continue;
            }

            if len < UDP_PAYLOAD_SIZE {
                let data = std::mem::take(&mut self.pending);
                return Ok(Some(Frame::new(FrameFormat::H264, data)).filter(|f| !f.is_empty()));
            }
        }
    }

    fn release(&mut self) {
        if self.socket.take().is_some() {
            debug!("Released video socket");
        }
        self.pending.clear();
    }
}

/// H.264 to RGB decoder
pub struct H264Decoder {
    decoder: Decoder,
}

impl H264Decoder {
    pub fn new() -> Result<Self> {
        let decoder = Decoder::new().map_err(|e| Error::CaptureError(format!("cannot create H.264 decoder: {}", e)))?;
        Ok(Self { decoder })
    }

    /// Decode one access unit
    ///
    /// Returns the last picture completed by the unit, `None` when it only carried parameter sets or references a
    /// picture the decoder has not seen yet.
    pub fn decode(&mut self, data: &[u8]) -> Option<Frame> {
        let mut picture = None;

        for nal in nal_units(data) {
            match self.decoder.decode(nal) {
                Ok(Some(yuv)) => {
                    let (width, height) = yuv.dimensions();
                    let mut rgb = vec![0u8; width * height * 3];
                    yuv.write_rgb8(&mut rgb);
                    picture = Some(Frame::new(
                        FrameFormat::Rgb24 {
                            width: width as u32,
                            height: height as u32,
                        },
                        rgb,
                    ));
                }
                Ok(None) => (),
                Err(e) => debug!("Dropping undecodable NAL unit: {}", e),
            }
        }

        picture
    }
}

/// # Decoding frame source
///
/// Wraps a source of H.264 access units and delivers RGB frames. Units that do not complete a picture are skipped,
/// frames in other formats pass through unchanged.
pub struct DecodingSource {
    inner: Box<dyn FrameSource>,
    decoder: H264Decoder,
}

impl DecodingSource {
    pub fn new(inner: Box<dyn FrameSource>) -> Result<Self> {
        Ok(Self {
            inner,
            decoder: H264Decoder::new()?,
        })
    }
}

#[async_trait]
impl FrameSource for DecodingSource {
    async fn read_frame(&mut self) -> Result<Option<Frame>> {
        loop {
            let frame = match self.inner.read_frame().await? {
                Some(frame) => frame,
                None => return Ok(None),
            };
            if frame.format != FrameFormat::H264 {
                return Ok(Some(frame));
            }
            if let Some(mut picture) = self.decoder.decode(&frame.data) {
                picture.captured_at = frame.captured_at;
                return Ok(Some(picture));
            }
        }
    }

    fn release(&mut self) {
        self.inner.release();
    }
}

/// Source selected by the [StreamResolver]
pub struct CommittedSource {
    pub endpoint: StreamEndpoint,
    /// The frame read while validating the endpoint
    pub first_frame: Frame,
    source: Box<dyn FrameSource>,
}

/// # Stream source resolver
pub struct StreamResolver {
    backend: Arc<dyn CaptureBackend>,
    probe_timeout: Duration,
}

impl StreamResolver {
    pub fn new(backend: Arc<dyn CaptureBackend>, probe_timeout: Duration) -> Self {
        Self {
            backend,
            probe_timeout,
        }
    }

    /// Commit to the first candidate that produces a non-empty frame
    ///
    /// Candidates are tried in order and are never touched once one succeeded. Returns
    /// [Error::NoSourceAvailable] when every candidate failed.
    pub async fn resolve(&self, candidates: &[StreamEndpoint]) -> Result<CommittedSource> {
        for endpoint in candidates {
            let mut source = match self.backend.open(endpoint).await {
                Ok(source) => source,
                Err(e) => {
                    info!("Cannot open video stream {}: {}", endpoint, e);
                    continue;
                }
            };

            let probe = timeout(self.probe_timeout, source.read_frame()).await;
            match probe {
                Ok(Ok(Some(frame))) if !frame.is_empty() => {
                    info!("Video stream committed to {}", endpoint);
                    return Ok(CommittedSource {
                        endpoint: endpoint.clone(),
                        first_frame: frame,
                        source,
                    });
                }
                Ok(Ok(_)) => info!("No frame from video stream {}", endpoint),
                Ok(Err(e)) => info!("Error reading video stream {}: {}", endpoint, e),
                Err(_) => info!("Timeout probing video stream {}", endpoint),
            }
            source.release();
        }

        Err(Error::NoSourceAvailable)
    }
}

/// Phase of the [AcquisitionLoop]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AcquisitionPhase {
    Starting,
    Streaming,
    Degraded,
    /// Neither the candidates nor the fallback provided video
    NoVideo,
    Stopped,
}

/// # Acquisition state snapshot
///
/// Written by the acquisition loop only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcquisitionState {
    pub phase: AcquisitionPhase,
    /// Committed endpoint, `"fallback"` when the secondary strategy is used
    pub active_source: Option<String>,
    pub fallback: bool,
    pub consecutive_failures: u32,
    /// Frames forwarded to the sink so far
    pub frames: u64,
}

impl AcquisitionState {
    fn starting() -> Self {
        Self {
            phase: AcquisitionPhase::Starting,
            active_source: None,
            fallback: false,
            consecutive_failures: 0,
            frames: 0,
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == AcquisitionPhase::Stopped
    }

    /// Count one more failed read, saturating on a feed that never comes back
    pub fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.phase, &self.active_source) {
            (AcquisitionPhase::Starting, _) => write!(f, "Video: searching for a stream"),
            (AcquisitionPhase::Streaming, Some(source)) => write!(f, "Video: streaming from {}", source),
            (AcquisitionPhase::Degraded, Some(source)) => write!(
                f,
                "Video: degraded, {} consecutive read failures on {}",
                self.consecutive_failures, source
            ),
            (AcquisitionPhase::NoVideo, _) => write!(f, "Video: no video available"),
            (AcquisitionPhase::Stopped, _) => write!(f, "Video: stopped after {} frames", self.frames),
            (phase, None) => write!(f, "Video: {:?}", phase),
        }
    }
}

/// # Acquisition loop
///
/// Owns the committed capture handle for its whole life. See the [video module documentation](crate::subsystems::video)
/// for more context and information.
pub struct AcquisitionLoop {
    config: VideoConfig,
    candidates: Vec<StreamEndpoint>,
    resolver: StreamResolver,
    fallback: Option<Arc<dyn FallbackCapture>>,
    transport: Option<Arc<dyn MotionTransport>>,
    state: Latest<AcquisitionState>,
    events: EventSink,
}

impl AcquisitionLoop {
    pub fn new(config: &VideoConfig, backend: Arc<dyn CaptureBackend>, events: EventSink) -> Result<Self> {
        Ok(Self {
            config: config.clone(),
            candidates: config.endpoints()?,
            resolver: StreamResolver::new(backend, config.probe_timeout()),
            fallback: None,
            transport: None,
            state: Latest::new(),
            events,
        })
    }

    /// Secondary strategy used when no candidate works
    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackCapture>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    /// Transport asked to stop streaming when the loop exits
    pub fn with_transport(mut self, transport: Arc<dyn MotionTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Publish the state to this slot instead of a private one
    pub fn with_state(mut self, state: Latest<AcquisitionState>) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> Latest<AcquisitionState> {
        self.state.clone()
    }

    async fn transition(&self, state: &AcquisitionState) {
        self.state.publish(state.clone());
        self.events.publish(Event::Video(state.clone())).await;
    }

    async fn open(&self, state: &mut AcquisitionState, sink: &mut impl FrameSink) -> Option<SourceGuard> {
        match self.resolver.resolve(&self.candidates).await {
            Ok(committed) => {
                state.active_source = Some(committed.endpoint.to_string());
                state.frames += 1;
                sink.forward(Arc::new(committed.first_frame));
                return Some(SourceGuard(committed.source));
            }
            Err(e) => warn!("{}, trying fallback capture", e),
        }

        let fallback = self.fallback.as_ref()?;
        match fallback.open_fallback().await {
            Ok(source) => {
                info!("Video acquired through fallback capture");
                state.active_source = Some("fallback".to_owned());
                state.fallback = true;
                Some(SourceGuard(source))
            }
            Err(e) => {
                error!("Fallback capture failed: {}", e);
                None
            }
        }
    }

    /// Acquire frames until `stop` is set
    ///
    /// Returns the final state. The capture handle is released and the transport asked to stop streaming on every
    /// exit path.
    pub async fn run(self, mut sink: impl FrameSink, stop: Arc<AtomicBool>) -> AcquisitionState {
        let mut state = AcquisitionState::starting();
        self.transition(&state).await;

        let source = self.open(&mut state, &mut sink).await;

        if let Some(mut source) = source {
            state.phase = AcquisitionPhase::Streaming;
            self.transition(&state).await;
            self.stream(&mut source, &mut state, &mut sink, &stop).await;
        } else {
            state.phase = AcquisitionPhase::NoVideo;
            self.transition(&state).await;
            self.events
                .publish(Event::Status("No video available, controls remain active".to_owned()))
                .await;
        }

        if let Some(transport) = &self.transport {
            if let Err(e) = transport.stream_off().await {
                warn!("Cannot stop video stream: {}", e);
            }
        }

        if state.phase != AcquisitionPhase::NoVideo {
            state.phase = AcquisitionPhase::Stopped;
        }
        self.transition(&state).await;
        info!("Video acquisition ended after {} frames", state.frames);

        state
    }

    async fn stream(
        &self,
        source: &mut SourceGuard,
        state: &mut AcquisitionState,
        sink: &mut impl FrameSink,
        stop: &AtomicBool,
    ) {
        while !stop.load(Relaxed) {
            let read = timeout(self.config.read_timeout(), source.read_frame()).await;
            let backoff = match read {
                Ok(Ok(Some(frame))) if !frame.is_empty() => {
                    state.frames += 1;
                    sink.forward(Arc::new(frame));
                    None
                }
                Ok(Ok(_)) => Some(self.config.idle_backoff()),
                Ok(Err(e)) => {
                    debug!("Video read failed: {}", e);
                    Some(self.config.error_backoff())
                }
                // The read timeout already waited
                Err(_) => Some(Duration::ZERO),
            };

            match backoff {
                None => {
                    state.consecutive_failures = 0;
                    if state.phase == AcquisitionPhase::Degraded {
                        info!("Video feed recovered");
                        state.phase = AcquisitionPhase::Streaming;
                        self.transition(state).await;
                    } else {
                        self.state.publish(state.clone());
                    }
                }
                Some(backoff) => {
                    state.record_failure();
                    if state.phase == AcquisitionPhase::Streaming
                        && state.consecutive_failures >= self.config.degraded_after
                    {
                        warn!("Video feed degraded after {} failed reads", state.consecutive_failures);
                        state.phase = AcquisitionPhase::Degraded;
                        self.transition(state).await;
                    }
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

/// # Access to the video subsystem
///
/// Read side of the acquisition: the most recent frame and the acquisition state.
#[derive(Debug, Clone, Default)]
pub struct Video {
    pub(crate) frames: Latest<Frame>,
    pub(crate) state: Latest<AcquisitionState>,
}

impl Video {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Most recent frame, `None` until the first frame has been acquired
    pub fn current_frame(&self) -> Option<Arc<Frame>> {
        self.frames.get()
    }

    pub fn state(&self) -> Option<Arc<AcquisitionState>> {
        self.state.get()
    }

    /// Watch for new frames
    pub fn subscribe(&self) -> tokio::sync::watch::Receiver<Option<Arc<Frame>>> {
        self.frames.subscribe()
    }
}
