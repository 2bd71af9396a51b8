// 该文件是 Yunmu （云目） 项目的一部分。
// tests/uplink_http.rs - 上传通道端到端测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 针对本地回环 HTTP 桩服务器的通道状态机与会话测试。

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use url::Url;

use yunmu::dispatch::DispatchSink;
use yunmu::frame::{Plane, RawFrame};
use yunmu::session::{CaptureSession, SessionConfig};
use yunmu::uplink::{ChannelState, UplinkConfig, UplinkEvent, UploadChannel};

/// 启动桩服务器，按顺序应答给定的 (状态行, 响应体) 序列后退出
fn spawn_stub(responses: Vec<(&'static str, String)>) -> (SocketAddr, JoinHandle<()>) {
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();

  let handle = std::thread::spawn(move || {
    for (status, body) in responses {
      let (mut stream, _) = listener.accept().unwrap();
      read_request(&mut stream);

      let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
      );
      stream.write_all(response.as_bytes()).unwrap();
      let _ = stream.flush();
    }
  });

  (addr, handle)
}

/// 读取完整请求（头部加 Content-Length 指定的请求体）
fn read_request(stream: &mut std::net::TcpStream) -> Vec<u8> {
  let mut buffer = Vec::new();
  let mut chunk = [0u8; 4096];
  let mut header_end = None;
  let mut content_length = 0usize;

  loop {
    if let Some(end) = header_end {
      if buffer.len() >= end + content_length {
        break;
      }
    }

    let n = stream.read(&mut chunk).unwrap();
    if n == 0 {
      break;
    }
    buffer.extend_from_slice(&chunk[..n]);

    if header_end.is_none() {
      if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
        header_end = Some(pos + 4);
        let headers = String::from_utf8_lossy(&buffer[..pos]);
        for line in headers.lines() {
          if let Some(value) = line
            .strip_prefix("Content-Length:")
            .or_else(|| line.strip_prefix("content-length:"))
          {
            content_length = value.trim().parse().unwrap_or(0);
          }
        }
      }
    }
  }

  buffer
}

fn gray_frame() -> RawFrame {
  RawFrame {
    y: Plane::new(vec![128u8; 32 * 32], 32, 1),
    u: Plane::new(vec![128u8; 16 * 16], 16, 1),
    v: Plane::new(vec![128u8; 16 * 16], 16, 1),
    width: 32,
    height: 32,
  }
}

fn wait_until_idle(channel: &UploadChannel) {
  let deadline = Instant::now() + Duration::from_secs(10);
  while channel.in_flight() {
    assert!(Instant::now() < deadline, "在途标志未在限期内清除");
    std::thread::sleep(Duration::from_millis(5));
  }
}

fn watch_status(channel: &UploadChannel) -> Arc<Mutex<Vec<ChannelState>>> {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&seen);
  channel
    .status()
    .subscribe(Box::new(move |state| sink.lock().unwrap().push(state)));
  seen
}

const DETECT_BODY: &str =
  r#"{"result":[{"x":320.0,"y":320.0,"w":100.0,"h":100.0,"confidence":0.9,"class_name":"person"}]}"#;

#[test]
fn successful_upload_walks_the_state_machine() {
  let (addr, stub) = spawn_stub(vec![("200 OK", DETECT_BODY.to_string())]);
  let endpoint = Url::parse(&format!("http://{}/yolo", addr)).unwrap();

  let (events_tx, events_rx) = mpsc::sync_channel(8);
  let channel = UploadChannel::spawn(UplinkConfig::detect(endpoint), events_tx).unwrap();
  let transitions = watch_status(&channel);

  channel.submit(gray_frame()).unwrap_or_else(|_| panic!("空闲通道拒绝了帧"));

  match events_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
    UplinkEvent::Detections(set) => {
      assert_eq!(set.items.len(), 1);
      assert_eq!(set.items[0].class_name, "person");
      // 坐标空间快照来自本次上传的压缩图像（32x32 旋转后仍为 32x32）
      assert_eq!((set.image_width, set.image_height), (32.0, 32.0));
    }
    other => panic!("意外事件: {:?}", other),
  }

  wait_until_idle(&channel);
  assert_eq!(
    *transitions.lock().unwrap(),
    vec![
      ChannelState::Connecting,
      ChannelState::Uploading,
      ChannelState::Connected
    ]
  );

  drop(channel);
  stub.join().unwrap();
}

#[test]
fn http_error_sets_error_state_and_frees_the_channel() {
  // 第一次应答 500，第二次应答成功
  let (addr, stub) = spawn_stub(vec![
    ("500 Internal Server Error", String::new()),
    ("200 OK", DETECT_BODY.to_string()),
  ]);
  let endpoint = Url::parse(&format!("http://{}/yolo", addr)).unwrap();

  let (events_tx, events_rx) = mpsc::sync_channel(8);
  let channel = UploadChannel::spawn(UplinkConfig::detect(endpoint), events_tx).unwrap();

  channel.submit(gray_frame()).unwrap_or_else(|_| panic!("空闲通道拒绝了帧"));

  // 失败通知到达，但没有结果事件
  match events_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
    UplinkEvent::Fault { message, .. } => assert!(message.contains("500")),
    other => panic!("意外事件: {:?}", other),
  }

  wait_until_idle(&channel);
  assert_eq!(channel.status().get(), ChannelState::Error);

  // 下一帧是一次全新的尝试
  channel.submit(gray_frame()).unwrap_or_else(|_| panic!("通道未恢复接收"));
  match events_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
    UplinkEvent::Detections(set) => assert_eq!(set.items.len(), 1),
    other => panic!("意外事件: {:?}", other),
  }

  wait_until_idle(&channel);
  assert_eq!(channel.status().get(), ChannelState::Connected);

  drop(channel);
  stub.join().unwrap();
}

#[test]
fn malformed_payload_is_no_result_but_stays_connected() {
  let (addr, stub) = spawn_stub(vec![("200 OK", "not json".to_string())]);
  let endpoint = Url::parse(&format!("http://{}/yolo", addr)).unwrap();

  let (events_tx, events_rx) = mpsc::sync_channel(8);
  let channel = UploadChannel::spawn(UplinkConfig::detect(endpoint), events_tx).unwrap();

  channel.submit(gray_frame()).unwrap_or_else(|_| panic!("空闲通道拒绝了帧"));
  wait_until_idle(&channel);

  assert_eq!(channel.status().get(), ChannelState::Connected);
  assert!(events_rx.try_recv().is_err());

  drop(channel);
  stub.join().unwrap();
}

#[test]
fn busy_channel_rejects_and_returns_the_frame() {
  // 桩服务器不应答，保持通道在途
  let listener = TcpListener::bind("127.0.0.1:0").unwrap();
  let addr = listener.local_addr().unwrap();
  let endpoint = Url::parse(&format!("http://{}/yolo", addr)).unwrap();

  let (events_tx, _events_rx) = mpsc::sync_channel(8);
  let channel = UploadChannel::spawn(UplinkConfig::detect(endpoint), events_tx).unwrap();

  channel.submit(gray_frame()).unwrap_or_else(|_| panic!("空闲通道拒绝了帧"));
  assert!(channel.in_flight());

  // 在途期间第二帧立即被拒绝并交还
  let rejected = channel.submit(gray_frame());
  let frame = rejected.expect_err("在途通道不应接收第二帧");
  assert_eq!((frame.width, frame.height), (32, 32));

  // 接受连接让在途请求尽快失败，避免等满超时
  drop(listener);
  drop(channel);
}

#[test]
fn describe_channel_delivers_text_and_audio() {
  let body = r#"{"result":"芝士雪豹","audio":"bWF5YmU="}"#;
  let (addr, stub) = spawn_stub(vec![("200 OK", body.to_string())]);
  let endpoint = Url::parse(&format!("http://{}/detect", addr)).unwrap();

  let (events_tx, events_rx) = mpsc::sync_channel(8);
  let channel = UploadChannel::spawn(UplinkConfig::describe(endpoint), events_tx).unwrap();

  channel.submit(gray_frame()).unwrap_or_else(|_| panic!("空闲通道拒绝了帧"));

  match events_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
    UplinkEvent::Description { text, audio } => {
      assert_eq!(text, "芝士雪豹");
      assert_eq!(audio.as_deref(), Some("bWF5YmU="));
    }
    other => panic!("意外事件: {:?}", other),
  }

  wait_until_idle(&channel);
  drop(channel);
  stub.join().unwrap();
}

#[test]
fn session_routes_frames_to_the_detect_channel() {
  let (addr, stub) = spawn_stub(vec![("200 OK", DETECT_BODY.to_string())]);
  let server = Url::parse(&format!("http://{}/", addr)).unwrap();

  let config = SessionConfig::from_server(&server).unwrap();
  let (mut session, events) = CaptureSession::start(config).unwrap();

  // 首帧进入快通道
  let outcome = session.push_frame(gray_frame());
  assert_eq!(
    outcome,
    yunmu::dispatch::DispatchOutcome::Accepted { slot: 0 }
  );

  match events.recv_timeout(Duration::from_secs(10)).unwrap() {
    UplinkEvent::Detections(set) => assert_eq!(set.items.len(), 1),
    other => panic!("意外事件: {:?}", other),
  }

  drop(events);
  drop(session);
  stub.join().unwrap();
}
