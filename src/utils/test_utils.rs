use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

#[derive(Clone, Debug)]
pub enum MockResponse {
    /// 200 response whose body parts are written with a pause in between.
    Stream(Vec<String>),
    /// Non-streaming response with a fixed status and body.
    Status(u16, String),
}

impl MockResponse {
    pub fn stream(parts: Vec<String>) -> Self {
        MockResponse::Stream(parts)
    }

    pub fn status(status: u16, body: &str) -> Self {
        MockResponse::Status(status, body.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct CapturedRequest {
    pub request_line: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl CapturedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(header, _)| header.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

pub struct MockServer {
    pub url: String,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
}

impl MockServer {
    pub async fn captured(&self) -> Vec<CapturedRequest> {
        self.captured.lock().await.clone()
    }
}

/// Serve `response` to every request on a fresh local port.
pub async fn spawn_mock_server(response: MockResponse) -> MockServer {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let captured: Arc<Mutex<Vec<CapturedRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let captured_for_server = Arc::clone(&captured);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let response = response.clone();
            let captured = Arc::clone(&captured_for_server);
            tokio::spawn(async move {
                let Ok((request_line, headers, body)) = read_http_request(&mut stream).await
                else {
                    return;
                };
                let body = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
                captured.lock().await.push(CapturedRequest {
                    request_line,
                    headers,
                    body,
                });
                let _ = write_response(&mut stream, &response).await;
            });
        }
    });

    MockServer {
        url: format!("http://{addr}/v1/chat/completions"),
        captured,
    }
}

async fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    match response {
        MockResponse::Stream(parts) => {
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n",
                )
                .await?;
            stream.flush().await?;
            for part in parts {
                stream.write_all(part.as_bytes()).await?;
                stream.flush().await?;
                tokio::time::sleep(Duration::from_millis(25)).await;
            }
        }
        MockResponse::Status(status, body) => {
            let head = format!(
                "HTTP/1.1 {status} Error\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            stream.write_all(head.as_bytes()).await?;
            stream.write_all(body.as_bytes()).await?;
        }
    }
    stream.shutdown().await
}

async fn read_http_request(
    stream: &mut TcpStream,
) -> Result<(String, Vec<(String, String)>, Vec<u8>), String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.ok_or_else(|| "header end should exist".to_string())?;
    let header_text =
        std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok((request_line, headers, body))
}
