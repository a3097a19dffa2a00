use crate::{
    capture::{CaptureController, CaptureError},
    hub_client::{ClientError, HubClient, UpdateResult},
    monitor::ConnectionState,
    stations::{CommandError, CommandKind, SharedRegistry, Station},
};
use actix_multipart::form::{MultipartForm, tempfile::TempFile};
use actix_web::{HttpResponse, Responder, web};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_valid::Validate;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Deserialize)]
pub struct SwitchPayload {
    pub on: bool,
}

#[derive(Deserialize, Validate)]
pub struct RenamePayload {
    #[validate(min_length = 1)]
    #[validate(max_length = 20)]
    pub name: String,
}

#[derive(MultipartForm)]
pub struct UploadFormSingleFile {
    file: TempFile,
}

#[derive(Serialize)]
struct StationsResponse {
    connection: ConnectionState,
    stations: Vec<Station>,
}

#[derive(Clone)]
pub struct Api<Client>
where
    Client: HubClient,
{
    pub hub: Client,
    pub registry: SharedRegistry,
    pub connection: watch::Receiver<ConnectionState>,
    pub capture: Arc<CaptureController>,
}

impl<Client> Api<Client>
where
    Client: HubClient,
{
    pub fn new(
        hub: Client,
        registry: SharedRegistry,
        connection: watch::Receiver<ConnectionState>,
        capture: Arc<CaptureController>,
    ) -> Self {
        Api {
            hub,
            registry,
            connection,
            capture,
        }
    }

    pub async fn stations(api: web::Data<Self>) -> HttpResponse {
        debug!("stations() called");

        let connection = *api.connection.borrow();
        let stations = api.registry.lock().unwrap().snapshot();

        HttpResponse::Ok().json(StationsResponse {
            connection,
            stations,
        })
    }

    pub async fn set_power(
        path: web::Path<usize>,
        body: web::Json<SwitchPayload>,
        api: web::Data<Self>,
    ) -> HttpResponse {
        let sid = path.into_inner();
        let on = body.on;
        debug!("set_power() called: sid={sid} on={on}");

        // optimistic: flip the slot before the hub confirms
        let previous = {
            let mut registry = api.registry.lock().unwrap();
            if let Err(e) = registry.begin_command(sid, CommandKind::Power) {
                return command_error_response(e);
            }
            match registry.set_powered(sid, on) {
                Ok(previous) => previous,
                Err(e) => {
                    registry.finish_command(sid, CommandKind::Power);
                    return command_error_response(e);
                }
            }
        };

        let result = api.hub.set_power(sid, on).await;

        let mut registry = api.registry.lock().unwrap();
        registry.finish_command(sid, CommandKind::Power);

        match result {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(e) => {
                error!("set_power failed: {e}");
                let _ = registry.set_powered(sid, previous);
                client_error_response(&e)
            }
        }
    }

    pub async fn set_record(
        path: web::Path<usize>,
        body: web::Json<SwitchPayload>,
        api: web::Data<Self>,
    ) -> HttpResponse {
        let sid = path.into_inner();
        let on = body.on;
        debug!("set_record() called: sid={sid} on={on}");

        if let Err(e) = api
            .registry
            .lock()
            .unwrap()
            .begin_command(sid, CommandKind::Record)
        {
            return command_error_response(e);
        }

        let result = api.hub.set_record(sid, on).await;

        api.registry
            .lock()
            .unwrap()
            .finish_command(sid, CommandKind::Record);

        match result {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(e) => {
                error!("set_record failed: {e}");
                client_error_response(&e)
            }
        }
    }

    pub async fn rename(
        path: web::Path<usize>,
        body: web::Json<RenamePayload>,
        api: web::Data<Self>,
    ) -> HttpResponse {
        let sid = path.into_inner();
        debug!("rename() called: sid={sid}");

        if let Err(e) = body.validate() {
            return HttpResponse::BadRequest().body(e.to_string());
        }
        let name = body.into_inner().name;

        let previous = {
            let mut registry = api.registry.lock().unwrap();
            if let Err(e) = registry.begin_command(sid, CommandKind::Rename) {
                return command_error_response(e);
            }
            // the registry re-validates; violations never reach the network
            match registry.set_name(sid, &name) {
                Ok(previous) => previous,
                Err(e) => {
                    registry.finish_command(sid, CommandKind::Rename);
                    return command_error_response(e);
                }
            }
        };

        let result = api.hub.rename(sid, &name).await;

        let mut registry = api.registry.lock().unwrap();
        registry.finish_command(sid, CommandKind::Rename);

        match result {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(e) => {
                error!("rename failed: {e}");
                let _ = registry.set_name(sid, &previous);
                client_error_response(&e)
            }
        }
    }

    pub async fn capture(api: web::Data<Self>) -> HttpResponse {
        debug!("capture() called");

        match api.capture.run(&api.hub).await {
            Ok(outcome) => HttpResponse::Ok().json(outcome),
            Err(e) => {
                error!("capture failed: {e}");
                capture_error_response(&e)
            }
        }
    }

    pub async fn last_capture(api: web::Data<Self>) -> HttpResponse {
        debug!("last_capture() called");

        match api.capture.last_record() {
            Some(record) => HttpResponse::Ok().json(record),
            None => HttpResponse::NotFound().finish(),
        }
    }

    pub async fn transmit(api: web::Data<Self>) -> HttpResponse {
        debug!("transmit() called");

        match api.capture.transmit(&api.hub).await {
            Ok(()) => HttpResponse::Ok().finish(),
            Err(e) => {
                error!("transmit failed: {e}");
                capture_error_response(&e)
            }
        }
    }

    /// Firmware pass-through: accept the uploaded image and forward it to
    /// the hub unchanged.
    pub async fn upload_firmware(
        MultipartForm(form): MultipartForm<UploadFormSingleFile>,
        api: web::Data<Self>,
    ) -> HttpResponse {
        debug!("upload_firmware() called");

        let file_name = form
            .file
            .file_name
            .clone()
            .unwrap_or_else(|| "firmware.bin".to_string());

        let bytes = match std::fs::read(form.file.file.path()) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!("failed to read uploaded file: {e}");
                return HttpResponse::InternalServerError().body("failed to read uploaded file");
            }
        };

        match api.hub.upload_firmware(file_name, bytes).await {
            Ok(UpdateResult { result: 0 }) => HttpResponse::Ok().json(UpdateResult { result: 0 }),
            Ok(update) => {
                error!("firmware update rejected by hub: result={}", update.result);
                HttpResponse::BadGateway().json(update)
            }
            Err(e) => {
                error!("upload_firmware failed: {e}");
                client_error_response(&e)
            }
        }
    }

    pub async fn healthcheck(api: web::Data<Self>) -> HttpResponse {
        debug!("healthcheck() called");

        let connection = *api.connection.borrow();
        if connection == ConnectionState::Connected {
            HttpResponse::Ok().json(connection)
        } else {
            HttpResponse::ServiceUnavailable().json(connection)
        }
    }

    pub async fn version() -> impl Responder {
        HttpResponse::Ok().body(env!("CARGO_PKG_VERSION"))
    }
}

fn command_error_response(e: CommandError) -> HttpResponse {
    match e {
        CommandError::CommandInFlight(_) => HttpResponse::Conflict().body(e.to_string()),
        CommandError::NoSuchStation(_) => HttpResponse::NotFound().body(e.to_string()),
        CommandError::NameTooShort | CommandError::NameTooLong => {
            HttpResponse::BadRequest().body(e.to_string())
        }
    }
}

fn client_error_response(e: &ClientError) -> HttpResponse {
    match e {
        ClientError::TimedOut => HttpResponse::GatewayTimeout().body(e.to_string()),
        _ => HttpResponse::BadGateway().body(e.to_string()),
    }
}

fn capture_error_response(e: &CaptureError) -> HttpResponse {
    match e {
        CaptureError::Busy | CaptureError::TransmitBusy => {
            HttpResponse::Conflict().body(e.to_string())
        }
        CaptureError::Scan(ClientError::TimedOut)
        | CaptureError::Fetch(ClientError::TimedOut)
        | CaptureError::Transmit(ClientError::TimedOut) => {
            HttpResponse::GatewayTimeout().body(e.to_string())
        }
        _ => HttpResponse::BadGateway().body(e.to_string()),
    }
}
