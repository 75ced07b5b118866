//! Sink writing request messages to a JetBrains-style `.http` file.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;

use crate::http;
use crate::message::Message;

use super::{meta_line, Output};

const FLUSH_INTERVAL: Duration = Duration::from_millis(100);

enum Sink {
    Plain(BufWriter<File>),
    Gzip(GzEncoder<File>),
}

impl Sink {
    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Sink::Plain(w) => w,
            Sink::Gzip(w) => w,
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Sink::Plain(w) => w.flush(),
            Sink::Gzip(w) => w.flush(),
        }
    }

    fn finish(self) -> io::Result<()> {
        match self {
            Sink::Plain(mut w) => w.flush(),
            Sink::Gzip(w) => w.finish().map(|_| ()),
        }
    }
}

/// Writes emitted request messages to a `.http` request file, compressing
/// with gzip when the path ends in `.gz`. Responses and CONNECT requests are
/// skipped; a background task flushes the file periodically so a tail of the
/// capture is readable while recording.
pub struct HttpFileOutput {
    sink: Arc<Mutex<Option<Sink>>>,
    stop: Arc<AtomicBool>,
    flusher: Option<thread::JoinHandle<()>>,
}

impl HttpFileOutput {
    /// Create (truncating) the output file and start the flusher.
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        let sink = if path.extension().is_some_and(|e| e == "gz") {
            Sink::Gzip(GzEncoder::new(file, Compression::default()))
        } else {
            Sink::Plain(BufWriter::new(file))
        };

        let sink = Arc::new(Mutex::new(Some(sink)));
        let stop = Arc::new(AtomicBool::new(false));
        let flusher = {
            let sink = Arc::clone(&sink);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    thread::sleep(FLUSH_INTERVAL);
                    if let Some(sink) = sink.lock().as_mut() {
                        let _ = sink.flush();
                    }
                }
            })
        };

        Ok(Self {
            sink,
            stop,
            flusher: Some(flusher),
        })
    }

    /// Stop the flusher and finish the file; further writes fail. Also run
    /// on drop.
    pub fn close(&mut self) -> io::Result<()> {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.flusher.take() {
            let _ = handle.join();
        }
        match self.sink.lock().take() {
            Some(sink) => sink.finish(),
            None => Ok(()),
        }
    }
}

impl Output for HttpFileOutput {
    fn name(&self) -> &'static str {
        "http-file"
    }

    fn write_message(&mut self, msg: &Message) -> io::Result<usize> {
        if !msg.is_request {
            return Ok(0);
        }
        let data = msg.data();
        // CONNECT tunnels carry no replayable payload.
        match http::request_method(&data) {
            Some("CONNECT") | None => return Ok(0),
            Some(_) => {}
        }

        let mut guard = self.sink.lock();
        let Some(sink) = guard.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed"));
        };
        let w = sink.writer();
        let header = format!("# {}\n", meta_line(msg));
        w.write_all(header.as_bytes())?;
        w.write_all(&data)?;
        w.write_all(b"\n\n###\n\n")?;
        Ok(header.len() + data.len() + 7)
    }
}

impl Drop for HttpFileOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use flate2::read::GzDecoder;
    use std::io::Read;

    use crate::packet::Packet;

    fn request(payload: &'static [u8]) -> Message {
        let mut m = Message::new(true);
        m.append(Packet {
            src_port: 60000,
            dst_port: 80,
            seq: 1,
            payload: Bytes::from_static(payload),
            ..Packet::default()
        });
        m
    }

    #[test]
    fn test_writes_requests_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.http");
        let mut out = HttpFileOutput::create(&path).unwrap();

        let req = request(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n");
        assert!(out.write_message(&req).unwrap() > 0);

        let mut resp = Message::new(false);
        resp.append(Packet {
            payload: Bytes::from_static(b"HTTP/1.1 200 OK\r\n\r\n"),
            ..Packet::default()
        });
        assert_eq!(out.write_message(&resp).unwrap(), 0);

        let connect = request(b"CONNECT host:443 HTTP/1.1\r\n\r\n");
        assert_eq!(out.write_message(&connect).unwrap(), 0);

        out.close().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# request "));
        assert!(contents.contains("GET / HTTP/1.1"));
        assert!(contents.contains("\n\n###\n\n"));
        assert!(!contents.contains("200 OK"));
        assert!(!contents.contains("CONNECT"));
    }

    #[test]
    fn test_gzip_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.http.gz");
        let mut out = HttpFileOutput::create(&path).unwrap();

        let req = request(b"GET /gz HTTP/1.1\r\n\r\n");
        out.write_message(&req).unwrap();
        out.close().unwrap();

        let mut decoder = GzDecoder::new(File::open(&path).unwrap());
        let mut contents = String::new();
        decoder.read_to_string(&mut contents).unwrap();
        assert!(contents.contains("GET /gz HTTP/1.1"));
    }

    #[test]
    fn test_write_after_close_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("closed.http");
        let mut out = HttpFileOutput::create(&path).unwrap();
        out.close().unwrap();

        let req = request(b"GET / HTTP/1.1\r\n\r\n");
        assert!(out.write_message(&req).is_err());
    }
}
