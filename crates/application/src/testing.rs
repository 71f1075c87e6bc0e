use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use domain::{TransportError, Transport};

/// 记录所有发出帧的内存传输
#[derive(Debug)]
pub struct RecordingTransport {
    frames: Mutex<Vec<String>>,
    alive: AtomicBool,
    closed: AtomicBool,
    congested: AtomicBool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            frames: Mutex::new(Vec::new()),
            alive: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            congested: AtomicBool::new(false),
        }
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 解析后的帧
    pub fn json_frames(&self) -> Vec<serde_json::Value> {
        self.frames()
            .iter()
            .map(|frame| serde_json::from_str(frame).expect("frame is json"))
            .collect()
    }

    /// 帧的 `type` 字段
    pub fn frame_types(&self) -> Vec<String> {
        self.json_frames()
            .iter()
            .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// 模拟对端断开
    pub fn disconnect(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }

    /// 模拟发送缓冲区已满，连接仍然存活
    pub fn congest(&self) {
        self.congested.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Transport for RecordingTransport {
    fn send(&self, payload: &str) -> Result<(), TransportError> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Closed);
        }
        if self.congested.load(Ordering::SeqCst) {
            return Err(TransportError::Backpressure);
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(payload.to_string());
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}
