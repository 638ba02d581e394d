//! TCP link to the HUD client.
//!
//! One non-blocking listener accepts two kinds of connections: a *live*
//! connection that receives the stream header once and then a single
//! `u64` end-of-frame timestamp per completed present, and a *capture*
//! connection that receives a chunked mirror of the packet stream for a
//! requested number of frames.
//!
//! Socket failures never propagate: the offending socket is closed, the
//! tap keeps running and the file sink is unaffected.

use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};

use crate::packet::LOG_HANDSHAKE;
use crate::settings::CaptureMode;

/// A granted capture request, not yet armed.
pub struct CaptureRequest {
    stream: TcpStream,
    num_frames: u32,
    marker_depth: u32,
}

/// Server half of the HUD protocol.
pub struct HudLink {
    listener: Option<TcpListener>,
    live: Option<TcpStream>,
    capture: Option<TcpStream>,
    frames_to_capture: u32,
}

fn read_u32(stream: &mut TcpStream) -> std::io::Result<u32> {
    let mut bytes = [0; 4];
    stream.read_exact(&mut bytes)?;
    Ok(u32::from_le_bytes(bytes))
}

impl HudLink {
    /// Binds the listener unless the capture mode is file-only.
    pub fn new(port: u16, capture_mode: CaptureMode) -> Self {
        let listener = if capture_mode == CaptureMode::Local {
            None
        } else {
            match TcpListener::bind(("0.0.0.0", port)) {
                Ok(listener) => match listener.set_nonblocking(true) {
                    Ok(()) => {
                        log::info!("listening for HUD clients on port {port}");
                        Some(listener)
                    }
                    Err(err) => {
                        log::error!("making HUD listener non-blocking failed: {err}");
                        None
                    }
                },
                Err(err) => {
                    log::error!("binding HUD listener on port {port} failed: {err}");
                    None
                }
            }
        };

        Self {
            listener,
            live: None,
            capture: None,
            frames_to_capture: 0,
        }
    }

    /// Port the listener actually bound (it may have been requested as 0).
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .and_then(|listener| listener.local_addr().ok())
            .map(|addr| addr.port())
    }

    /// Accepts a pending live connection: handshake in, header out.
    pub fn poll_live_connection(&mut self, header: &[u8]) {
        if self.live.is_some() {
            return;
        }
        let Some(listener) = &self.listener else {
            return;
        };

        let mut stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return,
            Err(err) => {
                log::warn!("accepting live HUD connection failed: {err}");
                return;
            }
        };

        // The listener hands out whatever blocking mode the platform
        // defaults to; the handshake exchange wants a blocking socket.
        let _ = stream.set_nonblocking(false);

        match read_u32(&mut stream) {
            Ok(LOG_HANDSHAKE) => {}
            Ok(other) => {
                log::warn!("live HUD client sent bad handshake {other:#010x}");
                return;
            }
            Err(err) => {
                log::warn!("receiving live HUD handshake failed: {err}");
                return;
            }
        }

        if let Err(err) = stream.write_all(header) {
            log::warn!("transmitting header to live HUD client failed: {err}");
            return;
        }

        log::info!("live HUD client connected");
        self.live = Some(stream);
    }

    /// Accepts a pending capture connection and reads its request. A
    /// capture is only granted while a live connection exists.
    pub fn poll_capture_request(&mut self) -> Option<CaptureRequest> {
        if self.live.is_none() || self.capture.is_some() {
            return None;
        }
        let listener = self.listener.as_ref()?;

        let mut stream = match listener.accept() {
            Ok((stream, _)) => stream,
            Err(err) if err.kind() == ErrorKind::WouldBlock => return None,
            Err(err) => {
                log::warn!("accepting capture connection failed: {err}");
                return None;
            }
        };
        let _ = stream.set_nonblocking(false);

        match read_u32(&mut stream) {
            Ok(LOG_HANDSHAKE) => {}
            Ok(other) => {
                log::warn!("capture client sent bad handshake {other:#010x}");
                return None;
            }
            Err(err) => {
                log::warn!("receiving capture handshake failed: {err}");
                return None;
            }
        }

        let num_frames = match read_u32(&mut stream) {
            Ok(0) => {
                log::warn!("capture client requested zero frames");
                return None;
            }
            Ok(frames) => frames,
            Err(err) => {
                log::warn!("receiving capture frame count failed: {err}");
                return None;
            }
        };

        let marker_depth = match read_u32(&mut stream) {
            Ok(depth) => depth,
            Err(err) => {
                log::warn!("receiving capture marker depth failed: {err}");
                return None;
            }
        };

        Some(CaptureRequest {
            stream,
            num_frames,
            marker_depth,
        })
    }

    /// Arms a granted capture; returns the requested marker depth.
    pub fn arm_capture(&mut self, request: CaptureRequest) -> u32 {
        log::info!(
            "capture armed for {} frames at marker depth {}",
            request.num_frames,
            request.marker_depth
        );
        self.capture = Some(request.stream);
        self.frames_to_capture = request.num_frames;
        request.marker_depth
    }

    /// Mirrors outbound bytes to the capture client as one sized chunk.
    /// A no-op unless a capture is armed with frames remaining.
    pub fn transmit_capture(&mut self, bytes: &[u8]) {
        if self.frames_to_capture == 0 || bytes.is_empty() {
            return;
        }
        let Some(stream) = &mut self.capture else {
            return;
        };

        let chunk_size = (bytes.len() as u32).to_le_bytes();
        if let Err(err) = stream
            .write_all(&chunk_size)
            .and_then(|()| stream.write_all(bytes))
        {
            log::warn!("transmitting capture chunk failed: {err}");
            self.capture = None;
            self.frames_to_capture = 0;
        }
    }

    /// Sends one end-of-frame timestamp to the live client.
    pub fn send_frametime(&mut self, timestamp: u64) {
        let Some(stream) = &mut self.live else {
            return;
        };
        if let Err(err) = stream.write_all(&timestamp.to_le_bytes()) {
            log::warn!("transmitting frametime failed: {err}");
            self.live = None;
        }
    }

    /// Whether the frame being counted right now is the capture's last.
    pub fn capture_on_final_frame(&self) -> bool {
        self.capture.is_some() && self.frames_to_capture == 1
    }

    /// Counts one captured frame.
    pub fn count_captured_frame(&mut self) {
        if self.capture.is_some() && self.frames_to_capture > 0 {
            self.frames_to_capture -= 1;
        }
    }

    /// Sends the `0u32` completion marker ending a capture. The socket
    /// stays open, switched to non-blocking, until the client acknowledges
    /// through [`HudLink::poll_capture_completion`].
    pub fn finish_capture(&mut self) {
        self.frames_to_capture = 0;
        let Some(stream) = &mut self.capture else {
            return;
        };

        if let Err(err) = stream.write_all(&0u32.to_le_bytes()) {
            log::warn!("transmitting capture completion marker failed: {err}");
            self.capture = None;
            return;
        }
        let _ = stream.set_nonblocking(true);
        log::info!("capture complete, awaiting client acknowledgement");
    }

    /// Polls a finished capture socket for the client's acknowledgement;
    /// `0xFFFFFFFF` or any read failure closes it.
    pub fn poll_capture_completion(&mut self) {
        if self.frames_to_capture > 0 {
            return;
        }
        let Some(stream) = &mut self.capture else {
            return;
        };

        let mut bytes = [0; 4];
        match stream.read(&mut bytes) {
            Ok(4) if u32::from_le_bytes(bytes) == 0xFFFF_FFFF => {
                log::info!("capture client acknowledged completion");
                self.capture = None;
            }
            Ok(0) => {
                // Orderly shutdown from the client side.
                self.capture = None;
            }
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::WouldBlock => {}
            Err(err) => {
                log::warn!("polling capture acknowledgement failed: {err}");
                self.capture = None;
            }
        }
    }
}
