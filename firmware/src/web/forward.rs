use alloc::string::String;
use clipbox_engine::management::{Increment, Method};
use picoserve::{
    request::Request,
    response::ResponseWriter,
    routing::RequestHandlerService,
    ResponseSent,
};

use crate::web::{write_response, AppState};

/// Hands a bodiless request to the engine as a single increment.
pub struct Forward;

impl RequestHandlerService<AppState> for Forward {
    async fn call_request_handler_service<
        R: embedded_io_async::Read,
        W: ResponseWriter<Error = R::Error>,
    >(
        &self,
        state: &AppState,
        _path_parameters: (),
        request: Request<'_, R>,
        response_writer: W,
    ) -> Result<ResponseSent, W::Error> {
        let method = Method::parse(request.parts.method());
        let mut target = String::from(request.parts.path().encoded());
        if let Some(query) = request.parts.query() {
            target.push('?');
            target.push_str(query.0);
        }

        let response = state
            .bridge
            .begin()
            .await
            .exchange(Increment::Request { method, target })
            .await;

        let connection = request.body_connection.finalize().await?;
        write_response(response, connection, response_writer).await
    }
}
