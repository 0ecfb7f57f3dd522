//! HTTP front of the management service.
//!
//! picoserve parses requests on the network tasks; every request is then handed to the
//! engine one [`Increment`] at a time through [`Bridge`], and the engine's reply is written
//! back. One conversation runs at a time.

use clipbox_engine::error::NetworkError;
use clipbox_engine::management::{Increment, Response, Transport};
use embassy_net::Stack;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::mutex::{Mutex, MutexGuard};
use embassy_sync::signal::Signal;
use embassy_time::Duration;
use esp_alloc as _;
use picoserve::io::{Read, Write};
use picoserve::response::{Connection, Content, IntoResponse, ResponseWriter, StatusCode};
use picoserve::{routing, AppWithStateBuilder, ResponseSent, Router};

use crate::{mk_static, wifi};

mod forward;
mod upload;

pub(crate) static BRIDGE: Bridge = Bridge::new();

/// Hands increments from the HTTP tasks to the engine loop and carries its replies back.
pub struct Bridge {
    increments: Channel<CriticalSectionRawMutex, Increment, 1>,
    replies: Signal<CriticalSectionRawMutex, Option<Response>>,
    conversation: Mutex<CriticalSectionRawMutex, ()>,
}

impl Bridge {
    const fn new() -> Self {
        Self {
            increments: Channel::new(),
            replies: Signal::new(),
            conversation: Mutex::new(()),
        }
    }

    /// Waits until no other request is talking to the engine.
    pub async fn begin(&self) -> Conversation<'_> {
        let guard = self.conversation.lock().await;
        // A reply may be left over from a request whose connection dropped.
        self.replies.reset();
        Conversation {
            bridge: self,
            _guard: guard,
        }
    }
}

pub struct Conversation<'a> {
    bridge: &'a Bridge,
    _guard: MutexGuard<'a, CriticalSectionRawMutex, ()>,
}

impl Conversation<'_> {
    pub async fn exchange(&mut self, increment: Increment) -> Option<Response> {
        self.bridge.increments.send(increment).await;
        self.bridge.replies.wait().await
    }
}

/// Engine side of the bridge.
pub struct WebTransport {
    bridge: &'static Bridge,
    radio_available: bool,
}

impl WebTransport {
    /// `radio_available` is false when the Wi-Fi controller failed to initialize.
    pub fn new(radio_available: bool) -> Self {
        Self {
            bridge: &BRIDGE,
            radio_available,
        }
    }
}

impl Transport for WebTransport {
    fn enable(&mut self) -> Result<(), NetworkError> {
        if !self.radio_available {
            return Err(NetworkError::BringUp);
        }
        wifi::ENABLE.signal(());
        Ok(())
    }

    fn poll(&mut self) -> Option<Increment> {
        self.bridge.increments.try_receive().ok()
    }

    fn reply(&mut self, response: Option<Response>) {
        self.bridge.replies.signal(response);
    }
}

#[derive(Clone)]
pub struct AppState {
    bridge: &'static Bridge,
}

struct Body<'a> {
    content_type: &'static str,
    body: &'a str,
}

impl Content for Body<'_> {
    fn content_type(&self) -> &'static str {
        self.content_type
    }

    fn content_length(&self) -> usize {
        self.body.len()
    }

    async fn write_content<W: Write>(self, mut writer: W) -> Result<(), W::Error> {
        writer.write_all(self.body.as_bytes()).await
    }
}

/// Writes the engine's reply, or a 500 if the engine gave none.
async fn write_response<R: Read, W: ResponseWriter<Error = R::Error>>(
    response: Option<Response>,
    connection: Connection<'_, R>,
    response_writer: W,
) -> Result<ResponseSent, W::Error> {
    let response = response.unwrap_or_else(|| {
        Response::text(
            clipbox_engine::management::StatusCode::INTERNAL_SERVER_ERROR,
            "No response",
        )
    });
    let status = StatusCode::new(response.status.as_u16());
    let body = Body {
        content_type: response.content_type,
        body: &response.body,
    };

    match response.location {
        Some(location) => {
            picoserve::response::Response::new(status, body)
                .with_header("Location", location)
                .write_to(connection, response_writer)
                .await
        }
        None => {
            picoserve::response::Response::new(status, body)
                .write_to(connection, response_writer)
                .await
        }
    }
}

pub struct Application;
impl AppWithStateBuilder for Application {
    type PathRouter = impl routing::PathRouter<AppState>;
    type State = AppState;

    fn build_app(self) -> picoserve::Router<Self::PathRouter, AppState> {
        picoserve::Router::new()
            .route("/", routing::get_service(forward::Forward))
            .route("/upload", routing::post_service(upload::UploadService))
            .route(
                "/delete",
                routing::get_service(forward::Forward).delete_service(forward::Forward),
            )
    }
}

pub struct WebApp {
    pub router: &'static Router<<Application as AppWithStateBuilder>::PathRouter, AppState>,
    pub config: &'static picoserve::Config<Duration>,
}

impl Default for WebApp {
    fn default() -> Self {
        let router = mk_static!(Router<<Application as AppWithStateBuilder>::PathRouter, AppState>, Application.build_app());

        let config = mk_static!(
            picoserve::Config<Duration>,
            picoserve::Config::new(picoserve::Timeouts {
                start_read_request: Some(Duration::from_secs(5)),
                persistent_start_read_request: Some(Duration::from_secs(1)),
                read_request: Some(Duration::from_secs(5)),
                write: Some(Duration::from_secs(5)),
            })
            .keep_connection_alive()
        );

        Self { router, config }
    }
}

pub const WEB_TASK_POOL_SIZE: usize = 2;

#[embassy_executor::task(pool_size = WEB_TASK_POOL_SIZE)]
pub async fn web_task(
    id: usize,
    stack: Stack<'static>,
    router: &'static Router<<Application as AppWithStateBuilder>::PathRouter, AppState>,
    config: &'static picoserve::Config<Duration>,
) -> ! {
    let port = 80;
    let mut tcp_rx_buffer = alloc::vec![0; 1024];
    let mut tcp_tx_buffer = alloc::vec![0; 1024];
    let mut http_buffer = alloc::vec![0; 2048];

    let state = AppState { bridge: &BRIDGE };
    let app_with_state = &router.shared().with_state(state);

    loop {
        let _shutdown_reason = picoserve::Server::new(app_with_state, config, &mut http_buffer)
            .listen_and_serve(id, stack, port, &mut tcp_rx_buffer, &mut tcp_tx_buffer)
            .await;
    }
}
