//! The gated file-management service.
//!
//! The network side hands the service one [`Increment`] at a time: either a whole bodiless
//! request or one piece of a streamed upload. Each increment gets exactly one
//! [`Transport::reply`]; `None` means "consumed, keep sending". The reply to an upload's
//! `End` is held back while the received file is copied into place, one chunk per call.

use alloc::string::String;
use alloc::vec::Vec;

use crate::catalog::Catalog;
use crate::error::{NetworkError, StorageError};
use crate::storage::{is_valid_name, Storage};

mod listing;
pub mod multipart;
mod upload;

pub use listing::render_listing;
pub use upload::STAGING_NAME;
use upload::Uploads;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Method {
    Get,
    Post,
    Delete,
    Other,
}

impl Method {
    pub fn parse(method: &str) -> Self {
        match method {
            "GET" => Self::Get,
            "POST" => Self::Post,
            "DELETE" => Self::Delete,
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Increment {
    /// A complete request without a body. `target` is the path plus the raw query.
    Request { method: Method, target: String },
    Upload(UploadPart),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPart {
    Start { filename: String },
    Data(Vec<u8>),
    End,
    /// The request failed before its body was complete.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: Self = Self(200);
    pub const NO_CONTENT: Self = Self(204);
    pub const SEE_OTHER: Self = Self(303);
    pub const BAD_REQUEST: Self = Self(400);
    pub const NOT_FOUND: Self = Self(404);
    pub const CONFLICT: Self = Self(409);
    pub const INTERNAL_SERVER_ERROR: Self = Self(500);
    pub const INSUFFICIENT_STORAGE: Self = Self(507);

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    pub content_type: &'static str,
    pub location: Option<&'static str>,
    pub body: String,
}

impl Response {
    pub fn html(body: String) -> Self {
        Self {
            status: StatusCode::OK,
            content_type: "text/html; charset=utf-8",
            location: None,
            body,
        }
    }

    pub fn text(status: StatusCode, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=utf-8",
            location: None,
            body: message.into(),
        }
    }

    pub fn see_other(location: &'static str) -> Self {
        Self {
            status: StatusCode::SEE_OTHER,
            content_type: "text/plain; charset=utf-8",
            location: Some(location),
            body: String::new(),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: StatusCode::NO_CONTENT,
            content_type: "text/plain; charset=utf-8",
            location: None,
            body: String::new(),
        }
    }

    fn storage_failure(err: StorageError) -> Self {
        match err {
            StorageError::Full => Self::text(StatusCode::INSUFFICIENT_STORAGE, "Storage is full"),
            StorageError::InvalidName => Self::text(StatusCode::BAD_REQUEST, "Invalid file name"),
            _ => Self::text(StatusCode::INTERNAL_SERVER_ERROR, "Storage error"),
        }
    }
}

/// Request source of the management service.
pub trait Transport {
    /// Brings the network up. Called once per enable attempt.
    fn enable(&mut self) -> Result<(), NetworkError>;

    /// Takes the next pending increment, if any. Never waits.
    fn poll(&mut self) -> Option<Increment>;

    fn reply(&mut self, response: Option<Response>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Route {
    Listing,
    Upload,
    Delete,
    NotFound,
}

const ROUTES: &[(Method, &str, Route)] = &[
    (Method::Get, "/", Route::Listing),
    (Method::Post, "/upload", Route::Upload),
    (Method::Get, "/delete", Route::Delete),
    (Method::Delete, "/delete", Route::Delete),
];

impl Route {
    pub fn resolve(method: Method, path: &str) -> Self {
        ROUTES
            .iter()
            .find(|(m, p, _)| *m == method && *p == path)
            .map_or(Self::NotFound, |(_, _, route)| *route)
    }
}

/// What one [`ManagementService::service`] call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Served {
    pub route: Route,
    pub status: Option<StatusCode>,
}

pub struct ManagementService<S: Storage> {
    enabled: bool,
    uploads: Uploads<S>,
}

impl<S: Storage> Default for ManagementService<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Storage> ManagementService<S> {
    pub fn new() -> Self {
        Self {
            enabled: false,
            uploads: Uploads::new(),
        }
    }

    /// Stays enabled until restart.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_receiving(&self) -> bool {
        self.uploads.target().is_some()
    }

    /// Whether a finished upload is still being copied over its target.
    pub fn is_committing(&self) -> bool {
        self.uploads.is_promoting()
    }

    /// Resource whose contents are incomplete until the current commit is done.
    pub fn replacing(&self) -> Option<&str> {
        self.uploads.replacing()
    }

    /// Services at most one pending increment, or advances the upload commit instead.
    /// `busy` is the playback session state.
    pub fn service<T>(
        &mut self,
        transport: &mut T,
        storage: &mut S,
        catalog: &Catalog,
        busy: bool,
    ) -> Option<Served>
    where
        T: Transport,
    {
        if !self.enabled {
            return None;
        }

        if self.uploads.is_promoting() {
            let response = self.uploads.promote(storage, catalog)?;
            return Some(respond(transport, Route::Upload, Some(response)));
        }

        let (route, response) = match transport.poll()? {
            Increment::Request { method, target } => {
                let (path, query) = target.split_once('?').unwrap_or((target.as_str(), ""));
                let route = Route::resolve(method, path);
                let response = match route {
                    Route::Listing => listing(storage, catalog),
                    Route::Upload => {
                        Response::text(StatusCode::BAD_REQUEST, "Expected a multipart upload")
                    }
                    Route::Delete => self.delete(storage, catalog, busy, method, query),
                    Route::NotFound => Response::text(StatusCode::NOT_FOUND, "Not found"),
                };
                (route, Some(response))
            }
            Increment::Upload(part) => {
                let response = self.uploads.handle(part, storage, busy);
                if self.uploads.is_promoting() {
                    debug!("Upload received, committing");
                    return Some(Served {
                        route: Route::Upload,
                        status: None,
                    });
                }
                (Route::Upload, response)
            }
        };

        Some(respond(transport, route, response))
    }

    fn delete(
        &mut self,
        storage: &mut S,
        catalog: &Catalog,
        busy: bool,
        method: Method,
        query: &str,
    ) -> Response {
        if busy {
            return Response::text(StatusCode::CONFLICT, "A clip is playing");
        }
        let Some(name) = query_param(query, "filename").filter(|name| is_valid_name(name)) else {
            return Response::text(StatusCode::BAD_REQUEST, "Missing or invalid filename");
        };
        if self.uploads.holds(&name) {
            return Response::text(StatusCode::CONFLICT, "File is being uploaded");
        }

        match storage.remove(&name) {
            Ok(()) => {
                info!("Deleted {}", name.as_str());
                catalog.audit(storage);
                if method == Method::Delete {
                    Response::no_content()
                } else {
                    Response::see_other("/")
                }
            }
            Err(StorageError::NotFound) => Response::text(StatusCode::NOT_FOUND, "No such file"),
            Err(err) => {
                warn!("Deleting {} failed: {}", name.as_str(), err);
                Response::storage_failure(err)
            }
        }
    }
}

fn respond<T: Transport>(
    transport: &mut T,
    route: Route,
    response: Option<Response>,
) -> Served {
    let served = Served {
        route,
        status: response.as_ref().map(|response| response.status),
    };
    if let Some(status) = served.status {
        info!("{:?} -> {}", route, status.as_u16());
    }
    transport.reply(response);
    served
}

fn listing<S: Storage>(storage: &mut S, catalog: &Catalog) -> Response {
    match storage.list() {
        Ok(entries) => Response::html(render_listing(&entries, catalog)),
        Err(err) => {
            warn!("Listing storage failed: {}", err);
            Response::storage_failure(err)
        }
    }
}

/// Decoded value of `key` in an `application/x-www-form-urlencoded` query.
pub fn query_param(query: &str, key: &str) -> Option<String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('=').or(Some((pair, ""))))
        .find(|(k, _)| *k == key)
        .and_then(|(_, value)| percent_decode(value))
}

fn percent_decode(value: &str) -> Option<String> {
    let mut bytes = Vec::with_capacity(value.len());
    let mut input = value.bytes();
    while let Some(b) = input.next() {
        match b {
            b'+' => bytes.push(b' '),
            b'%' => {
                let hi = hex_value(input.next()?)?;
                let lo = hex_value(input.next()?)?;
                bytes.push(hi << 4 | lo);
            }
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).ok()
}

fn hex_value(digit: u8) -> Option<u8> {
    (digit as char).to_digit(16).map(|v| v as u8)
}
