#![allow(dead_code)]

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

pub static PIXEL_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 4, 0,
    0, 0, 181, 28, 12, 2, 0, 0, 0, 11, 73, 68, 65, 84, 120, 218, 99, 252, 255, 23, 0, 2, 3, 1, 128,
    110, 220, 25, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

pub static PIXEL_GIF: &[u8] = b"GIF89a\x01\x00\x01\x00\x00\x00\x00;";

/// Image host: `/img/*.png` and `/img/*.gif` succeed, everything else is 404.
/// Every request's user agent is sent back over the returned channel.
pub struct ImageServer {
    pub base_url: String,
    pub user_agents: mpsc::Receiver<String>,
    shutdown: mpsc::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl ImageServer {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let base_url = format!("http://{}", server.server_addr());
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let (ua_tx, ua_rx) = mpsc::channel::<String>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }
                let request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let user_agent = request
                    .headers()
                    .iter()
                    .find(|h| h.field.equiv("User-Agent"))
                    .map(|h| h.value.as_str().to_string())
                    .unwrap_or_default();
                let _ = ua_tx.send(user_agent);

                let path = request.url().split('?').next().unwrap_or_default().to_string();
                let (status, body, content_type): (u16, &[u8], &str) =
                    if path.starts_with("/img/") && path.ends_with(".png") {
                        (200, PIXEL_PNG, "image/png")
                    } else if path.starts_with("/img/") && path.ends_with(".gif") {
                        (200, PIXEL_GIF, "image/gif")
                    } else {
                        (404, b"not found", "text/plain")
                    };

                let header =
                    tiny_http::Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes())
                        .expect("build header");
                let response = tiny_http::Response::from_data(body.to_vec())
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            user_agents: ua_rx,
            shutdown: shutdown_tx,
            handle: Some(handle),
        }
    }
}

impl Drop for ImageServer {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
