pub use crate::files::uploads;
use crate::auth::AuthenticatedUser;
use crate::files::FileKey;
use crate::workflow::{Actor, DocumentRef, WorkflowError};
use crate::{fields, models, schema, tasks, workflow};
use crate::{CeleryApp, Config, DbConn, DocumentID, FieldID};
use itertools::Itertools;
use rocket::serde::json::Json;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClientMeta {
    pub ip: std::net::IpAddr,
    pub user_agent: String,
}

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for ClientMeta {
    type Error = &'static str;

    async fn from_request(
        request: &'r rocket::Request<'_>,
    ) -> rocket::request::Outcome<Self, Self::Error> {
        let mut ip = match rocket_client_addr::ClientRealAddr::from_request(request).await {
            rocket::request::Outcome::Success(ip) => ip.ip,
            rocket::request::Outcome::Forward(f) => return rocket::request::Outcome::Forward(f),
            rocket::request::Outcome::Failure(_) => {
                return rocket::request::Outcome::Failure((
                    rocket::http::Status::BadRequest,
                    "Unable to ascertain client IP",
                ))
            }
        };

        if let std::net::IpAddr::V6(v6_ip) = ip {
            if let Some(v4_ip) = v6_ip.to_ipv4() {
                ip = std::net::IpAddr::V4(v4_ip);
            }
        }

        let user_agent = match request.headers().get_one("User-Agent") {
            Some(v) => v.to_string(),
            None => {
                return rocket::request::Outcome::Failure((
                    rocket::http::Status::BadRequest,
                    "Unable to ascertain client user agent",
                ))
            }
        };

        rocket::request::Outcome::Success(ClientMeta { ip, user_agent })
    }
}

/// Error surface of the facade: an HTTP status and a JSON `{"detail": …}`
/// body.
#[derive(Debug, Clone)]
pub struct ApiError {
    status: rocket::http::Status,
    detail: String,
}

impl ApiError {
    fn new(status: rocket::http::Status, detail: String) -> Self {
        ApiError { status, detail }
    }

    pub fn status(&self) -> rocket::http::Status {
        self.status
    }
}

impl From<WorkflowError> for ApiError {
    fn from(e: WorkflowError) -> Self {
        match e {
            WorkflowError::NotFound(detail) => ApiError::new(rocket::http::Status::NotFound, detail),
            WorkflowError::StateConflict(detail) => {
                ApiError::new(rocket::http::Status::Conflict, detail)
            }
            WorkflowError::Validation(detail) => {
                ApiError::new(rocket::http::Status::BadRequest, detail)
            }
            WorkflowError::Authorization(detail) => {
                ApiError::new(rocket::http::Status::Forbidden, detail)
            }
            WorkflowError::Storage => ApiError::new(
                rocket::http::Status::ServiceUnavailable,
                "Storage temporarily unavailable, please retry".to_string(),
            ),
        }
    }
}

impl<'r> rocket::response::Responder<'r, 'static> for ApiError {
    fn respond_to(self, _req: &'r rocket::Request<'_>) -> rocket::response::Result<'static> {
        let body = serde_json::json!({ "detail": self.detail }).to_string();
        rocket::Response::build()
            .status(self.status)
            .header(rocket::http::ContentType::JSON)
            .sized_body(body.len(), std::io::Cursor::new(body))
            .ok()
    }
}

#[derive(Serialize, Debug)]
pub struct FieldResponse {
    pub id: FieldID,
    pub document_id: DocumentID,
    pub page_number: i64,
    pub x_position: f64,
    pub y_position: f64,
    pub width: f64,
    pub height: f64,
    pub signer_email: Option<String>,
    pub status: schema::FieldStatus,
    pub signature_data: Option<String>,
}

impl FieldResponse {
    fn new(field: &models::SignatureField, viewport_width: Option<f64>) -> Self {
        let placement = match viewport_width {
            Some(w) => fields::Placement::from(field).scale(w),
            None => fields::Placement::from(field),
        };
        FieldResponse {
            id: FieldID::from(field.id),
            document_id: DocumentID::from(field.document_id),
            page_number: placement.page_number,
            x_position: placement.x_position,
            y_position: placement.y_position,
            width: placement.width,
            height: placement.height,
            signer_email: field.signer_email.clone(),
            status: field.status,
            signature_data: field.signature_data.clone(),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct AuditEntryResponse {
    pub id: uuid::Uuid,
    pub action: schema::AuditAction,
    pub details: Option<String>,
    pub user_id: Option<uuid::Uuid>,
    pub ip_address: String,
    pub user_agent: String,
    pub created_at: chrono::NaiveDateTime,
}

impl From<&models::AuditLog> for AuditEntryResponse {
    fn from(l: &models::AuditLog) -> Self {
        AuditEntryResponse {
            id: l.id,
            action: l.action,
            details: l.details.clone(),
            user_id: l.user_id,
            ip_address: l.ip_address.ip().to_string(),
            user_agent: l.user_agent.clone(),
            created_at: l.created_at,
        }
    }
}

#[derive(Serialize, Debug)]
pub struct DocumentResponse {
    pub id: DocumentID,
    pub title: String,
    pub status: schema::DocumentStatus,
    pub file_path: String,
    pub file_key: String,
    pub signed_file_path: Option<String>,
    pub signed_file_key: Option<String>,
    pub signing_token: Option<String>,
    pub user_id: uuid::Uuid,
    pub created_at: chrono::NaiveDateTime,
    pub signature_fields: Vec<FieldResponse>,
    pub audit_logs: Vec<AuditEntryResponse>,
}

fn document_response(
    view: &workflow::DocumentView,
    config: &Config,
    viewport_width: Option<f64>,
) -> DocumentResponse {
    let document = &view.document;
    DocumentResponse {
        id: DocumentID::from(document.id),
        title: document.title.clone(),
        status: document.status,
        file_path: document.file_path.clone(),
        file_key: FileKey::new(&document.file_path, &config.files_key).to_string(),
        signed_file_key: document
            .signed_file_path
            .as_deref()
            .map(|p| FileKey::new(p, &config.files_key).to_string()),
        signed_file_path: document.signed_file_path.clone(),
        signing_token: document.signing_token.clone(),
        user_id: document.user_id,
        created_at: document.created_at,
        signature_fields: view
            .fields
            .iter()
            .map(|f| FieldResponse::new(f, viewport_width))
            .collect(),
        audit_logs: view.audit_entries.iter().map(AuditEntryResponse::from).collect(),
    }
}

fn check_viewport_width(viewport_width: Option<f64>) -> Result<(), ApiError> {
    if let Some(w) = viewport_width {
        if !w.is_finite() || w <= 0.0 {
            return Err(WorkflowError::Validation(
                "viewport_width must be a positive number".to_string(),
            )
            .into());
        }
    }
    Ok(())
}

#[derive(FromForm)]
pub struct UploadForm<'r> {
    title: String,
    file: rocket::fs::TempFile<'r>,
}

#[post("/api/docs/upload", data = "<form>", format = "multipart/form-data")]
pub async fn upload_document(
    mut form: rocket::form::Form<UploadForm<'_>>,
    user: AuthenticatedUser,
    client_meta: ClientMeta,
    db: DbConn,
    config: &rocket::State<Config>,
) -> Result<Json<DocumentResponse>, ApiError> {
    if form.file.content_type() != Some(&rocket::http::ContentType::PDF) {
        return Err(WorkflowError::Validation("Only PDF files are allowed".to_string()).into());
    }

    let file_name = match crate::files::store_upload(&mut form.file).await {
        Ok(n) => n,
        Err(err) => {
            error!("Unable to store uploaded file: {}", err);
            return Err(WorkflowError::Storage.into());
        }
    };

    let title = form.title.clone();
    let user_model = user.0;
    let view = crate::db_run(&db, move |c| {
        let document =
            workflow::upload_document(c, &user_model, &title, &file_name, &client_meta)?;
        workflow::fetch_document(c, &user_model, document.id)
    })
    .await?;

    Ok(Json(document_response(&view, config, None)))
}

#[get("/api/docs")]
pub async fn list_documents(
    user: AuthenticatedUser,
    db: DbConn,
    config: &rocket::State<Config>,
) -> Result<Json<Vec<DocumentResponse>>, ApiError> {
    let user_model = user.0;
    let views = crate::db_run(&db, move |c| workflow::list_documents(c, &user_model)).await?;
    Ok(Json(
        views
            .iter()
            .map(|v| document_response(v, config, None))
            .collect(),
    ))
}

#[get("/api/docs/<did>", rank = 2)]
pub async fn get_document(
    did: DocumentID,
    user: AuthenticatedUser,
    db: DbConn,
    config: &rocket::State<Config>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let user_model = user.0;
    let view =
        crate::db_run(&db, move |c| workflow::fetch_document(c, &user_model, did.uuid)).await?;
    Ok(Json(document_response(&view, config, None)))
}

#[derive(Deserialize)]
pub struct FieldCreateData {
    page_number: i64,
    x_position: f64,
    y_position: f64,
    width: f64,
    height: f64,
    signer_email: Option<String>,
}

#[post("/api/docs/<did>/fields", data = "<data>", format = "application/json")]
pub async fn add_field(
    did: DocumentID,
    data: Json<FieldCreateData>,
    user: AuthenticatedUser,
    db: DbConn,
) -> Result<Json<FieldResponse>, ApiError> {
    let data = data.into_inner();
    let placement = fields::Placement {
        page_number: data.page_number,
        x_position: data.x_position,
        y_position: data.y_position,
        width: data.width,
        height: data.height,
    };
    let user_model = user.0;
    let field = crate::db_run(&db, move |c| {
        workflow::add_field(c, &user_model, did.uuid, placement, data.signer_email)
    })
    .await?;
    Ok(Json(FieldResponse::new(&field, None)))
}

#[derive(Deserialize)]
pub struct FieldUpdateData {
    signer_email: Option<String>,
}

#[patch(
    "/api/docs/<did>/fields/<fid>",
    data = "<data>",
    format = "application/json"
)]
pub async fn update_field(
    did: DocumentID,
    fid: FieldID,
    data: Json<FieldUpdateData>,
    user: AuthenticatedUser,
    db: DbConn,
) -> Result<Json<FieldResponse>, ApiError> {
    let data = data.into_inner();
    let user_model = user.0;
    let field = crate::db_run(&db, move |c| {
        workflow::update_field(c, &user_model, did.uuid, fid.uuid, data.signer_email)
    })
    .await?;
    Ok(Json(FieldResponse::new(&field, None)))
}

#[delete("/api/docs/<did>/fields/<fid>")]
pub async fn delete_field(
    did: DocumentID,
    fid: FieldID,
    user: AuthenticatedUser,
    db: DbConn,
) -> Result<rocket::http::Status, ApiError> {
    let user_model = user.0;
    crate::db_run(&db, move |c| {
        workflow::delete_field(c, &user_model, did.uuid, fid.uuid)
    })
    .await?;
    Ok(rocket::http::Status::NoContent)
}

#[put("/api/docs/<did>/send")]
pub async fn send_document(
    did: DocumentID,
    user: AuthenticatedUser,
    client_meta: ClientMeta,
    db: DbConn,
    config: &rocket::State<Config>,
    celery_app: &rocket::State<CeleryApp>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let user_model = user.0;
    let um = user_model.clone();
    let (document, doc_fields) = crate::db_run(&db, move |c| {
        workflow::send_document(c, &um, did.uuid, &client_meta)
    })
    .await?;

    // One signing request per distinct assignee. Failures are logged and
    // dropped, the send itself has already committed.
    let signers = doc_fields
        .iter()
        .filter_map(|f| f.signer_email.as_deref())
        .filter(|e| !e.is_empty())
        .map(str::to_owned)
        .unique()
        .collect::<Vec<_>>();
    for signer in signers {
        match celery_app
            .send_task(tasks::request_signature::new(document.clone(), signer))
            .await
        {
            Ok(_) => {}
            Err(err) => warn!("Failed to queue signature request: {:?}", err),
        }
    }

    let view = crate::db_run(&db, move |c| {
        workflow::fetch_document(c, &user_model, did.uuid)
    })
    .await?;
    Ok(Json(document_response(&view, config, None)))
}

#[derive(Deserialize)]
pub struct SignatureData {
    signature_data: String,
}

async fn dispatch_sign_notifications(
    celery_app: &CeleryApp,
    outcome: &workflow::SignOutcome,
) {
    match celery_app
        .send_task(tasks::signature_applied::new(
            outcome.document.clone(),
            FieldID::from(outcome.field.id).to_string(),
        ))
        .await
    {
        Ok(_) => {}
        Err(err) => warn!("Failed to queue signature notification: {:?}", err),
    }
    if outcome.completed {
        match celery_app
            .send_task(tasks::document_completed::new(outcome.document.clone()))
            .await
        {
            Ok(_) => {}
            Err(err) => warn!("Failed to queue completion notification: {:?}", err),
        }
    }
}

#[post(
    "/api/docs/<did>/fields/<fid>/sign",
    data = "<data>",
    format = "application/json"
)]
pub async fn sign_field(
    did: DocumentID,
    fid: FieldID,
    data: Json<SignatureData>,
    user: AuthenticatedUser,
    client_meta: ClientMeta,
    db: DbConn,
    celery_app: &rocket::State<CeleryApp>,
) -> Result<Json<FieldResponse>, ApiError> {
    let data = data.into_inner();
    let user_model = user.0;
    let outcome = crate::db_run(&db, move |c| {
        workflow::sign_field(
            c,
            &Actor::User(user_model),
            &DocumentRef::Id(did.uuid),
            fid.uuid,
            &data.signature_data,
            &client_meta,
        )
    })
    .await?;

    dispatch_sign_notifications(celery_app.inner(), &outcome).await;
    Ok(Json(FieldResponse::new(&outcome.field, None)))
}

#[post(
    "/api/docs/public/<token>/fields/<fid>/sign",
    data = "<data>",
    format = "application/json",
    rank = 1
)]
pub async fn sign_public_field(
    token: String,
    fid: FieldID,
    data: Json<SignatureData>,
    client_meta: ClientMeta,
    db: DbConn,
    celery_app: &rocket::State<CeleryApp>,
) -> Result<Json<FieldResponse>, ApiError> {
    let data = data.into_inner();
    let outcome = crate::db_run(&db, move |c| {
        workflow::sign_field(
            c,
            &Actor::TokenHolder,
            &DocumentRef::Token(token),
            fid.uuid,
            &data.signature_data,
            &client_meta,
        )
    })
    .await?;

    dispatch_sign_notifications(celery_app.inner(), &outcome).await;
    Ok(Json(FieldResponse::new(&outcome.field, None)))
}

#[post("/api/docs/<did>/decline?<reason>", rank = 2)]
pub async fn decline_document(
    did: DocumentID,
    reason: Option<String>,
    user: AuthenticatedUser,
    client_meta: ClientMeta,
    db: DbConn,
    config: &rocket::State<Config>,
    celery_app: &rocket::State<CeleryApp>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let reason = reason.unwrap_or_else(|| "No reason provided".to_string());
    let user_model = user.0;
    let um = user_model.clone();
    let r = reason.clone();
    let document = crate::db_run(&db, move |c| {
        workflow::decline_document(
            c,
            &Actor::User(um),
            &DocumentRef::Id(did.uuid),
            &r,
            &client_meta,
        )
    })
    .await?;

    match celery_app
        .send_task(tasks::document_declined::new(document.clone(), reason))
        .await
    {
        Ok(_) => {}
        Err(err) => warn!("Failed to queue decline notification: {:?}", err),
    }

    let view = crate::db_run(&db, move |c| {
        // Declining as an assigned signer still answers with the document
        // they declined, so resolve by id rather than ownership.
        match workflow::fetch_document(c, &user_model, did.uuid) {
            Err(WorkflowError::Authorization(_)) => match document.signing_token.as_deref() {
                Some(token) => workflow::fetch_document_by_token(c, token),
                None => Err(WorkflowError::NotFound("Document not found".to_string())),
            },
            r => r,
        }
    })
    .await?;
    Ok(Json(document_response(&view, config, None)))
}

#[post("/api/docs/public/<token>/decline?<reason>", rank = 1)]
pub async fn decline_public_document(
    token: String,
    reason: Option<String>,
    client_meta: ClientMeta,
    db: DbConn,
    config: &rocket::State<Config>,
    celery_app: &rocket::State<CeleryApp>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let reason = reason.unwrap_or_else(|| "No reason provided".to_string());
    let t = token.clone();
    let r = reason.clone();
    let document = crate::db_run(&db, move |c| {
        workflow::decline_document(
            c,
            &Actor::TokenHolder,
            &DocumentRef::Token(t),
            &r,
            &client_meta,
        )
    })
    .await?;

    match celery_app
        .send_task(tasks::document_declined::new(document, reason))
        .await
    {
        Ok(_) => {}
        Err(err) => warn!("Failed to queue decline notification: {:?}", err),
    }

    let view =
        crate::db_run(&db, move |c| workflow::fetch_document_by_token(c, &token)).await?;
    Ok(Json(document_response(&view, config, None)))
}

#[post("/api/docs/<did>/recall", rank = 2)]
pub async fn recall_document(
    did: DocumentID,
    user: AuthenticatedUser,
    client_meta: ClientMeta,
    db: DbConn,
    config: &rocket::State<Config>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let user_model = user.0;
    let um = user_model.clone();
    crate::db_run(&db, move |c| {
        workflow::recall_document(c, &um, did.uuid, &client_meta)
    })
    .await?;

    let view = crate::db_run(&db, move |c| {
        workflow::fetch_document(c, &user_model, did.uuid)
    })
    .await?;
    Ok(Json(document_response(&view, config, None)))
}

#[get("/api/docs/<did>/audit", rank = 2)]
pub async fn document_audit(
    did: DocumentID,
    user: AuthenticatedUser,
    db: DbConn,
) -> Result<Json<Vec<AuditEntryResponse>>, ApiError> {
    let user_model = user.0;
    let view =
        crate::db_run(&db, move |c| workflow::fetch_document(c, &user_model, did.uuid)).await?;
    Ok(Json(
        view.audit_entries
            .iter()
            .map(AuditEntryResponse::from)
            .collect(),
    ))
}

#[get("/api/docs/<did>/download", rank = 2)]
pub async fn download_document(
    did: DocumentID,
    user: AuthenticatedUser,
    client_meta: ClientMeta,
    db: DbConn,
) -> Result<rocket::fs::NamedFile, ApiError> {
    let user_model = user.0;
    let document = crate::db_run(&db, move |c| {
        workflow::download_document(c, &user_model, did.uuid, &client_meta)
    })
    .await?;

    let path = document
        .signed_file_path
        .as_deref()
        .unwrap_or(&document.file_path);
    match rocket::fs::NamedFile::open(std::path::Path::new(crate::FILES_DIR).join(path)).await {
        Ok(f) => Ok(f),
        Err(err) => {
            error!("Unable to open signed document {}: {}", path, err);
            Err(WorkflowError::Storage.into())
        }
    }
}

#[get("/api/docs/public/<token>?<viewport_width>", rank = 1)]
pub async fn get_public_document(
    token: String,
    viewport_width: Option<f64>,
    db: DbConn,
    config: &rocket::State<Config>,
) -> Result<Json<DocumentResponse>, ApiError> {
    check_viewport_width(viewport_width)?;
    let view =
        crate::db_run(&db, move |c| workflow::fetch_document_by_token(c, &token)).await?;
    Ok(Json(document_response(&view, config, viewport_width)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses_follow_the_taxonomy() {
        let cases = [
            (
                WorkflowError::NotFound("Document not found".to_string()),
                rocket::http::Status::NotFound,
            ),
            (
                WorkflowError::StateConflict("Document is completed".to_string()),
                rocket::http::Status::Conflict,
            ),
            (
                WorkflowError::Validation("Document has no signature fields".to_string()),
                rocket::http::Status::BadRequest,
            ),
            (
                WorkflowError::Authorization("Not authorized".to_string()),
                rocket::http::Status::Forbidden,
            ),
            (WorkflowError::Storage, rocket::http::Status::ServiceUnavailable),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from(err).status(), status);
        }
    }

    #[test]
    fn viewport_width_must_be_positive_and_finite() {
        assert!(check_viewport_width(None).is_ok());
        assert!(check_viewport_width(Some(375.0)).is_ok());
        for bad in [0.0, -100.0, f64::NAN, f64::INFINITY] {
            assert!(check_viewport_width(Some(bad)).is_err());
        }
    }
}
