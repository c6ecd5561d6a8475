//! Transport interface of the engine.
//!
//! The engine never opens a link itself; the host hands it something that
//! can push framed bytes to the peer. Publish frames and log batches are
//! the only outbound traffic.

/// Outbound framed byte sink.
pub trait Transport: Send {
    /// Send one data-plane frame (publish packets).
    fn send(&mut self, frame: &[u8]);

    /// Send one log batch. Defaults to the data-plane path; hosts with a
    /// dedicated diagnostics channel override this.
    fn send_log(&mut self, frame: &[u8]) {
        self.send(frame);
    }
}

/// Transport that drops every frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTransport;

impl Transport for NullTransport {
    fn send(&mut self, _frame: &[u8]) {}
}

/// Transport that records every frame, for tests and host-side capture.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    /// Data-plane frames in send order.
    pub frames: Vec<Vec<u8>>,
    /// Log batches in send order.
    pub logs: Vec<Vec<u8>>,
}

impl Transport for RecordingTransport {
    fn send(&mut self, frame: &[u8]) {
        self.frames.push(frame.to_vec());
    }

    fn send_log(&mut self, frame: &[u8]) {
        self.logs.push(frame.to_vec());
    }
}
