//! HTTP server: worker threads pulling from a shared tiny_http listener.
//!
//! Every request gets a request id, CORS headers, panic isolation, a
//! deadline and an access log line.

use anyhow::{anyhow, Result};
use std::io::Read;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};
use tiny_http::{Header, Method, Request, Response, Server, StatusCode};

use crate::handler::{Handler, Reply};

const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Largest request body accepted, in bytes
const MAX_BODY_BYTES: usize = 64 * 1024;

/// Pause before retrying after the listener fails to hand out a request
const RECV_RETRY_DELAY: Duration = Duration::from_millis(100);

const CORS_HEADERS: [(&str, &str); 3] = [
    ("Access-Control-Allow-Origin", "*"),
    ("Access-Control-Allow-Methods", "GET, POST, OPTIONS"),
    ("Access-Control-Allow-Headers", "Content-Type, X-Request-Id"),
];

#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub max_in_flight: usize,
    pub http_timeout: Duration,
}

/// Counts handler threads that are still running, including those that
/// outlived their request's deadline.
#[derive(Debug)]
pub struct InFlight {
    running: AtomicUsize,
    max: usize,
}

impl InFlight {
    pub fn new(max: usize) -> Arc<Self> {
        Arc::new(Self {
            running: AtomicUsize::new(0),
            max: max.max(1),
        })
    }

    fn acquire(self: &Arc<Self>) -> Option<Slot> {
        self.running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |running| {
                (running < self.max).then_some(running + 1)
            })
            .ok()
            .map(|_| Slot(Arc::clone(self)))
    }
}

/// One claimed handler thread; released on drop.
struct Slot(Arc<InFlight>);

impl Drop for Slot {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct PackServer {
    server: Arc<Server>,
    handler: Arc<Handler>,
    in_flight: Arc<InFlight>,
    options: ServerOptions,
    stopping: Arc<AtomicBool>,
    next_request_id: Arc<AtomicU64>,
}

/// Stops a running [`PackServer`] from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    server: Arc<Server>,
    workers: usize,
    stopping: Arc<AtomicBool>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        // each unblock releases one worker stuck in recv()
        for _ in 0..self.workers {
            self.server.unblock();
        }
    }
}

impl PackServer {
    pub fn bind(options: ServerOptions, handler: Handler) -> Result<Self> {
        let addr = format!("{}:{}", options.host, options.port);
        let server = Server::http(&addr).map_err(|e| anyhow!("Failed to start server on {}: {}", addr, e))?;

        Ok(Self {
            server: Arc::new(server),
            handler: Arc::new(handler),
            in_flight: InFlight::new(options.max_in_flight),
            options: ServerOptions {
                workers: options.workers.max(1),
                ..options
            },
            stopping: Arc::new(AtomicBool::new(false)),
            next_request_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            server: Arc::clone(&self.server),
            workers: self.options.workers,
            stopping: Arc::clone(&self.stopping),
        }
    }

    /// Serve requests until shut down.
    pub fn run(self) -> Result<()> {
        match self.local_addr() {
            Some(addr) => log::info!("server listening on {}", addr),
            None => log::info!("server listening on {}:{}", self.options.host, self.options.port),
        }
        log::debug!(
            "{} workers, request timeout {:?}",
            self.options.workers,
            self.options.http_timeout
        );

        let workers: Vec<_> = (0..self.options.workers)
            .map(|index| {
                let worker = Worker {
                    server: Arc::clone(&self.server),
                    handler: Arc::clone(&self.handler),
                    in_flight: Arc::clone(&self.in_flight),
                    stopping: Arc::clone(&self.stopping),
                    next_request_id: Arc::clone(&self.next_request_id),
                    timeout: self.options.http_timeout,
                };
                thread::Builder::new()
                    .name(format!("packer-worker-{}", index))
                    .spawn(move || worker.run())
                    .map_err(|e| anyhow!("Failed to spawn worker thread: {}", e))
            })
            .collect::<Result<_>>()?;

        for worker in workers {
            if worker.join().is_err() {
                log::error!("worker thread panicked");
            }
        }

        log::info!("server stopped");
        Ok(())
    }
}

struct Worker {
    server: Arc<Server>,
    handler: Arc<Handler>,
    in_flight: Arc<InFlight>,
    stopping: Arc<AtomicBool>,
    next_request_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl Worker {
    fn run(self) {
        loop {
            match self.server.recv() {
                Ok(request) => self.serve(request),
                Err(e) => {
                    if self.stopping.load(Ordering::SeqCst) {
                        return;
                    }
                    log::error!("failed to receive request: {}", e);
                    thread::sleep(RECV_RETRY_DELAY);
                }
            }
        }
    }

    fn serve(&self, mut request: Request) {
        let start = Instant::now();
        let method = request.method().clone();
        let url = request.url().to_string();
        let request_id = self.request_id(&request);

        let reply = if request.body_length().is_some_and(|length| length > MAX_BODY_BYTES) {
            Reply::text(413, "request body too large")
        } else {
            match read_body(request.as_reader(), MAX_BODY_BYTES) {
                Ok(Some(body)) => dispatch(
                    Arc::clone(&self.handler),
                    &self.in_flight,
                    request_id.clone(),
                    method.clone(),
                    url.clone(),
                    body,
                    self.timeout,
                ),
                Ok(None) => Reply::text(413, "request body too large"),
                Err(e) => {
                    log::warn!("[{}] failed to read request body: {}", request_id, e);
                    Reply::text(400, "failed to read request body")
                }
            }
        };

        let status = reply.status;
        if let Err(e) = request.respond(into_response(reply, &request_id)) {
            log::error!("[{}] failed to write response: {}", request_id, e);
        }

        log::info!(
            "[{}] {} {} - {} in {:?}",
            request_id,
            method,
            url,
            status,
            start.elapsed()
        );
    }

    /// Use the caller's request id if it sent one, otherwise allocate one.
    fn request_id(&self, request: &Request) -> String {
        request
            .headers()
            .iter()
            .find(|h| h.field.equiv(REQUEST_ID_HEADER))
            .map(|h| h.value.to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{:08}", self.next_request_id.fetch_add(1, Ordering::Relaxed)))
    }
}

/// Read a request body of at most `limit` bytes; `None` if it is longer.
fn read_body(reader: impl Read, limit: usize) -> std::io::Result<Option<Vec<u8>>> {
    let mut body = Vec::new();
    reader.take(limit as u64 + 1).read_to_end(&mut body)?;
    if body.len() > limit {
        return Ok(None);
    }
    Ok(Some(body))
}

/// Run the handler on its own thread, converting panics into a 500 and
/// giving up with a 503 once `timeout` elapses.
///
/// A timed-out computation keeps running to completion in the background
/// and its result is dropped. It holds its `in_flight` slot until then, so
/// a full `in_flight` turns new requests away with a 503.
pub fn dispatch(
    handler: Arc<Handler>,
    in_flight: &Arc<InFlight>,
    request_id: String,
    method: Method,
    url: String,
    body: Vec<u8>,
    timeout: Duration,
) -> Reply {
    let Some(slot) = in_flight.acquire() else {
        log::warn!("[{}] too many requests in flight", request_id);
        return Reply::text(503, "server busy");
    };

    let (tx, rx) = mpsc::channel();
    let id = request_id.clone();

    let spawned = thread::Builder::new().spawn(move || {
        let _slot = slot;
        let result = panic::catch_unwind(AssertUnwindSafe(|| handler.handle(&id, &method, &url, &body)));
        let _ = tx.send(result);
    });
    if let Err(e) = spawned {
        log::error!("[{}] failed to spawn request thread: {}", request_id, e);
        return Reply::text(500, "internal server error");
    }

    match rx.recv_timeout(timeout) {
        Ok(Ok(reply)) => reply,
        Ok(Err(_)) => {
            log::error!("[{}] handler panicked", request_id);
            Reply::text(500, "internal server error")
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            log::warn!("[{}] request timed out after {:?}", request_id, timeout);
            Reply::text(503, "request timed out")
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => {
            log::error!("[{}] handler thread exited without a reply", request_id);
            Reply::text(500, "internal server error")
        }
    }
}

fn into_response(reply: Reply, request_id: &str) -> Response<std::io::Cursor<Vec<u8>>> {
    let content_type = reply.content_type;
    let mut response = Response::from_data(reply.body).with_status_code(StatusCode(reply.status));

    for (field, value) in CORS_HEADERS {
        add_header(&mut response, field, value);
    }
    add_header(&mut response, "Content-Type", content_type);
    add_header(&mut response, REQUEST_ID_HEADER, request_id);

    response
}

fn add_header(response: &mut Response<std::io::Cursor<Vec<u8>>>, field: &str, value: &str) {
    if let Ok(header) = Header::from_bytes(field.as_bytes(), value.as_bytes()) {
        response.add_header(header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Limits;
    use packer::{CatalogStore, PackCalculator, PackCatalog, Packer};
    use std::io::Write;
    use std::net::TcpStream;

    struct PanickingCalculator;

    impl PackCalculator for PanickingCalculator {
        fn calculate(&self, _order: i64, _catalog: &PackCatalog) -> packer::Result<Vec<u64>> {
            panic!("calculator exploded");
        }
    }

    struct SlowCalculator;

    impl PackCalculator for SlowCalculator {
        fn calculate(&self, _order: i64, _catalog: &PackCatalog) -> packer::Result<Vec<u64>> {
            thread::sleep(Duration::from_millis(500));
            Ok(vec![250])
        }
    }

    fn handler_with(calculator: Arc<dyn PackCalculator>) -> Arc<Handler> {
        Arc::new(Handler::new(Arc::new(CatalogStore::default()), calculator, Limits::default()))
    }

    fn calculate(handler: Arc<Handler>, timeout: Duration) -> Reply {
        calculate_with(handler, &InFlight::new(4), timeout)
    }

    fn calculate_with(handler: Arc<Handler>, in_flight: &Arc<InFlight>, timeout: Duration) -> Reply {
        dispatch(
            handler,
            in_flight,
            "test".to_string(),
            Method::Post,
            "/calculate-best-packages".to_string(),
            br#"{"order": 501}"#.to_vec(),
            timeout,
        )
    }

    #[test]
    fn test_dispatch_returns_handler_reply() {
        let reply = calculate(handler_with(Arc::new(Packer::new())), Duration::from_secs(5));
        assert_eq!(reply.status, 200);
    }

    #[test]
    fn test_dispatch_recovers_from_panic() {
        let reply = calculate(handler_with(Arc::new(PanickingCalculator)), Duration::from_secs(5));
        assert_eq!(reply.status, 500);
    }

    #[test]
    fn test_dispatch_times_out() {
        let reply = calculate(handler_with(Arc::new(SlowCalculator)), Duration::from_millis(20));
        assert_eq!(reply.status, 503);
    }

    #[test]
    fn test_timed_out_requests_hold_their_slot() {
        let handler = handler_with(Arc::new(SlowCalculator));
        let in_flight = InFlight::new(1);

        let reply = calculate_with(Arc::clone(&handler), &in_flight, Duration::from_millis(20));
        assert_eq!(reply.status, 503);
        assert_eq!(reply.body, b"request timed out");

        // the first computation is still running in the background
        let reply = calculate_with(Arc::clone(&handler), &in_flight, Duration::from_secs(5));
        assert_eq!(reply.status, 503);
        assert_eq!(reply.body, b"server busy");

        thread::sleep(Duration::from_millis(700));
        let reply = calculate_with(handler, &in_flight, Duration::from_secs(5));
        assert_eq!(reply.status, 200);
    }

    #[test]
    fn test_read_body_limit() {
        let body = read_body(&b"{\"order\": 5}"[..], 64).unwrap();
        assert_eq!(body.as_deref(), Some(&b"{\"order\": 5}"[..]));

        assert_eq!(read_body(&[b'x'; 64][..], 64).unwrap().map(|b| b.len()), Some(64));
        assert_eq!(read_body(&[b'x'; 65][..], 64).unwrap(), None);
    }

    #[test]
    fn test_serves_over_tcp_and_shuts_down() {
        let options = ServerOptions {
            host: "127.0.0.1".to_string(),
            port: 0,
            workers: 2,
            max_in_flight: 4,
            http_timeout: Duration::from_secs(5),
        };
        let handler = Handler::new(Arc::new(CatalogStore::default()), Arc::new(Packer::new()), Limits::default());
        let server = PackServer::bind(options, handler).unwrap();
        let addr = server.local_addr().unwrap();
        let shutdown = server.shutdown_handle();
        let running = thread::spawn(move || server.run());

        let body = r#"{"order": 251}"#;
        let mut stream = TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "POST /calculate-best-packages HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\nX-Request-Id: abc-123\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            body
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();

        assert!(response.starts_with("HTTP/1.1 200"), "{}", response);
        assert!(response.contains("\"packages\""));
        assert!(response.contains("500"));
        assert!(response.contains("abc-123"));
        assert!(response.contains("Access-Control-Allow-Origin: *"));

        shutdown.shutdown();
        running.join().unwrap().unwrap();
    }
}
