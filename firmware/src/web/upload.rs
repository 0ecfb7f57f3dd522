use alloc::string::{String, ToString};
use clipbox_engine::management::multipart::{boundary_from_content_type, MultipartSplitter};
use clipbox_engine::management::{Increment, Method, Response, StatusCode, UploadPart};
use defmt::warn;
use embedded_io_async::Read;
use picoserve::{
    io::ReadExt,
    request::Request,
    response::ResponseWriter,
    routing::RequestHandlerService,
    ResponseSent,
};

use crate::web::{write_response, AppState};

/// Streams a `multipart/form-data` upload to the engine without buffering the file.
pub struct UploadService;

impl RequestHandlerService<AppState> for UploadService {
    async fn call_request_handler_service<
        R: embedded_io_async::Read,
        W: ResponseWriter<Error = R::Error>,
    >(
        &self,
        state: &AppState,
        _path_parameters: (),
        mut request: Request<'_, R>,
        response_writer: W,
    ) -> Result<ResponseSent, W::Error> {
        let boundary = request
            .parts
            .headers()
            .get("Content-Type")
            .and_then(|value| {
                let content_type = value.as_str().ok()?;
                boundary_from_content_type(content_type).map(|boundary| boundary.to_string())
            });

        let mut conversation = state.bridge.begin().await;

        let Some(boundary) = boundary else {
            // The engine answers a bodiless upload itself.
            let response = conversation
                .exchange(Increment::Request {
                    method: Method::Post,
                    target: String::from("/upload"),
                })
                .await;
            drop(conversation);
            let connection = request.body_connection.finalize().await?;
            return write_response(response, connection, response_writer).await;
        };

        let mut splitter = MultipartSplitter::new(&boundary);
        let mut body = request.body_connection.body().reader();
        let mut buffer = [0u8; 512];
        let mut response = None;
        let mut failed = false;

        'body: loop {
            match body.read(&mut buffer).await {
                Ok(0) => {
                    // eof
                    break;
                }
                Ok(n) => match splitter.push(&buffer[..n]) {
                    Ok(parts) => {
                        for part in parts {
                            response = conversation.exchange(Increment::Upload(part)).await;
                            if response.is_some() {
                                break 'body;
                            }
                        }
                        if splitter.is_done() {
                            // The epilogue is drained below.
                            break;
                        }
                    }
                    Err(err) => {
                        warn!("Malformed upload: {}", err);
                        failed = true;
                        break;
                    }
                },
                Err(_) => {
                    warn!("Upload stream terminated early");
                    failed = true;
                    break;
                }
            }
        }

        if response.is_none() {
            if let Err(err) = splitter.finish() {
                if !failed {
                    warn!("Incomplete upload: {}", err);
                }
                failed = true;
            }
        }
        if failed && response.is_none() {
            conversation
                .exchange(Increment::Upload(UploadPart::Aborted))
                .await;
            response = Some(Response::text(StatusCode::BAD_REQUEST, "Malformed upload"));
        }
        drop(conversation);

        body.discard_all_data().await?;
        let connection = request.body_connection.finalize().await?;
        write_response(response, connection, response_writer).await
    }
}
