use celery::prelude::*;
use diesel::prelude::*;
use itertools::Itertools;
use sha2::Digest;
use tokio::io::AsyncReadExt;

use crate::{audit, models, schema};

lazy_static::lazy_static! {
    pub static ref CONFIG: std::sync::RwLock<Option<Config>> = std::sync::RwLock::new(None);
    static ref TEMPLATES: tera::Tera = {
        let mut tera = match tera::Tera::new("templates_email/**/*") {
            Ok(t) => t,
            Err(e) => {
                println!("Parsing error(s): {}", e);
                ::std::process::exit(1);
            }
        };
        tera.autoescape_on(vec![".html"]);
        tera
    };
}

#[rocket::async_trait]
pub trait EmailTransport {
    async fn send(&self, msg: lettre::Message) -> TaskResult<()>;
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::stub::AsyncStubTransport {
    async fn send(&self, msg: lettre::Message) -> TaskResult<()> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(()) => Ok(()),
            Err(err) => Err(celery::error::TaskError::ExpectedError(format!(
                "Unable to send email: {}",
                err
            ))),
        }
    }
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::file::AsyncFileTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> TaskResult<()> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(celery::error::TaskError::ExpectedError(format!(
                "Unable to save email to file: {}",
                err
            ))),
        }
    }
}

#[rocket::async_trait]
impl EmailTransport for lettre::transport::smtp::AsyncSmtpTransport<lettre::Tokio1Executor> {
    async fn send(&self, msg: lettre::Message) -> TaskResult<()> {
        match lettre::AsyncTransport::send(self, msg).await {
            Ok(_) => Ok(()),
            Err(err) => Err(celery::error::TaskError::ExpectedError(format!(
                "Unable to send email with SMTP: {}",
                err
            ))),
        }
    }
}

type EmailTransportType = Box<dyn EmailTransport + Send + Sync>;
type DbPool = r2d2::Pool<diesel::r2d2::ConnectionManager<diesel::PgConnection>>;

#[derive(Clone)]
pub struct Config {
    pub db: std::sync::Arc<DbPool>,
    pub transport: std::sync::Arc<EmailTransportType>,
    pub external_uri: rocket::http::uri::Reference<'static>,
    pub from_addr: String,
}

#[inline]
fn config() -> Config {
    CONFIG.read().unwrap().as_ref().unwrap().clone()
}

fn with_db<T, F>(db: std::sync::Arc<DbPool>, func: F) -> TaskResult<T>
where
    F: FnOnce(&diesel::PgConnection) -> diesel::result::QueryResult<T>,
{
    tokio::task::block_in_place(move || {
        let c = db.get().map_err(|err| {
            celery::error::TaskError::ExpectedError(format!(
                "Unable to get DB pool connection: {}",
                err
            ))
        })?;
        func(&c).map_err(|err| {
            celery::error::TaskError::ExpectedError(format!("DB query failed: {}", err))
        })
    })
}

pub fn hash_slice(data: &[u8]) -> Vec<u8> {
    let mut hasher = sha2::Sha512::new();
    hasher.update(data);
    hasher.finalize().as_slice().into()
}

pub async fn hash_file<P: AsRef<std::path::Path>>(path: P) -> Option<Vec<u8>> {
    let mut hasher = sha2::Sha512::new();
    let mut file = tokio::io::BufReader::new(
        tokio::fs::File::open(std::path::Path::new(crate::FILES_DIR).join(path))
            .await
            .ok()?,
    );

    let mut buf = [0; 8192];
    while let Ok(size) = file.read(&mut buf[..]).await {
        if size == 0 {
            break;
        }
        hasher.update(&buf[0..size]);
    }

    Some(hasher.finalize().as_slice().into())
}

fn mailbox(email: &str) -> TaskResult<lettre::message::Mailbox> {
    Ok(lettre::message::Mailbox {
        name: None,
        email: match email.parse() {
            Ok(m) => m,
            Err(err) => {
                return Err(celery::error::TaskError::UnexpectedError(format!(
                    "Unable to parse email: {}",
                    err
                )))
            }
        },
    })
}

fn from_mailbox(conf: &Config) -> TaskResult<lettre::message::Mailbox> {
    match conf.from_addr.parse() {
        Ok(m) => Ok(m),
        Err(err) => Err(celery::error::TaskError::UnexpectedError(format!(
            "Unable to parse configured from address: {}",
            err
        ))),
    }
}

fn render_pair<C: serde::Serialize>(name: &str, context: &C) -> TaskResult<(String, String)> {
    let context = match tera::Context::from_serialize(context) {
        Ok(c) => c,
        Err(err) => {
            return Err(celery::error::TaskError::UnexpectedError(format!(
                "Unable to encode template context: {}",
                err
            )))
        }
    };
    let html = match TEMPLATES.render(&format!("{}.html", name), &context) {
        Ok(c) => c,
        Err(err) => {
            return Err(celery::error::TaskError::ExpectedError(format!(
                "Unable to render template: {}",
                err
            )))
        }
    };
    let txt = match TEMPLATES.render(&format!("{}.txt", name), &context) {
        Ok(c) => c,
        Err(err) => {
            return Err(celery::error::TaskError::ExpectedError(format!(
                "Unable to render template: {}",
                err
            )))
        }
    };
    Ok((html, txt))
}

fn load_owner(conf: &Config, document: &models::Document) -> TaskResult<models::User> {
    let user_id = document.user_id;
    match with_db(conf.db.clone(), move |c| {
        schema::users::dsl::users
            .find(user_id)
            .first::<models::User>(c)
            .optional()
    })? {
        Some(u) => Ok(u),
        None => Err(celery::error::TaskError::UnexpectedError(
            "Document owner does not exist".to_string(),
        )),
    }
}

fn load_signer_emails(conf: &Config, document: &models::Document) -> TaskResult<Vec<String>> {
    let document_id = document.id;
    let doc_fields = with_db(conf.db.clone(), move |c| {
        schema::signature_fields::dsl::signature_fields
            .filter(schema::signature_fields::dsl::document_id.eq(document_id))
            .load::<models::SignatureField>(c)
    })?;
    Ok(doc_fields
        .into_iter()
        .filter_map(|f| f.signer_email)
        .filter(|e| !e.is_empty())
        .unique()
        .collect())
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct AuditTrailEntry {
    id: uuid::Uuid,
    seq: i64,
    timestamp: chrono::DateTime<chrono::Utc>,
    user_id: Option<uuid::Uuid>,
    action: schema::AuditAction,
    details: Option<String>,
    ip_address: std::net::IpAddr,
    user_agent: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
struct AuditTrail {
    document_id: uuid::Uuid,
    title: String,
    document_hash: String,
    entries: Vec<AuditTrailEntry>,
}

/// JSON export of a document's full history, oldest entry first, with the
/// hash of the artifact it describes. Shipped next to the signed PDF so the
/// trail can be checked against the file it came with.
async fn make_audit_trail(document: &models::Document, conf: &Config) -> TaskResult<String> {
    let document_id = document.id;
    let entries = with_db(conf.db.clone(), move |c| {
        audit::list_chronological(c, document_id)
    })?;

    let file = document
        .signed_file_path
        .as_deref()
        .unwrap_or(&document.file_path)
        .to_string();
    let document_hash = match hash_file(&file).await {
        Some(h) => hex::encode(h),
        None => {
            return Err(celery::error::TaskError::ExpectedError(format!(
                "Unable to hash document file {}",
                file
            )))
        }
    };

    let trail = AuditTrail {
        document_id: document.id,
        title: document.title.clone(),
        document_hash,
        entries: entries
            .into_iter()
            .map(|e| AuditTrailEntry {
                id: e.id,
                seq: e.seq,
                timestamp: chrono::DateTime::from_utc(e.created_at, chrono::Utc),
                user_id: e.user_id,
                action: e.action,
                details: e.details,
                ip_address: e.ip_address.ip(),
                user_agent: e.user_agent,
            })
            .collect(),
    };

    Ok(serde_json::to_string_pretty(&trail).unwrap())
}

async fn read_document_file(path: &str) -> TaskResult<Vec<u8>> {
    match tokio::fs::read(std::path::Path::new(crate::FILES_DIR).join(path)).await {
        Ok(b) => Ok(b),
        Err(err) => Err(celery::error::TaskError::ExpectedError(format!(
            "Unable to read document file: {}",
            err
        ))),
    }
}

#[derive(Serialize)]
struct SigRequestContext {
    signing_url: String,
    document_title: String,
    sender_name: String,
}

/// Emails one signer their public signing link, with the current document
/// attached for review.
#[celery::task]
pub async fn request_signature(
    document: models::Document,
    signer_email: String,
) -> TaskResult<()> {
    let conf = config();

    let token = match document.signing_token.as_deref() {
        Some(t) => t.to_string(),
        None => {
            // Recalled between send and delivery; the link would be dead.
            warn!(
                "Document {} has no signing token, dropping signature request",
                document.id
            );
            return Ok(());
        }
    };

    let owner = load_owner(&conf, &document)?;
    let (email_html, email_txt) = render_pair(
        "sig_request",
        &SigRequestContext {
            signing_url: format!("{}/sign/{}", conf.external_uri, token),
            document_title: document.title.clone(),
            sender_name: owner.full_name.clone(),
        },
    )?;

    let doc_bytes = read_document_file(&document.file_path).await?;

    let m = match lettre::message::Message::builder()
        .from(from_mailbox(&conf)?)
        .to(mailbox(&signer_email)?)
        .subject(format!("Signature request: {}", document.title))
        .multipart(
            lettre::message::MultiPart::mixed()
                .multipart(lettre::message::MultiPart::alternative_plain_html(
                    email_txt, email_html,
                ))
                .singlepart(lettre::message::Attachment::new("document.pdf".to_string()).body(
                    doc_bytes,
                    lettre::message::header::ContentType::parse("application/pdf").unwrap(),
                )),
        ) {
        Ok(m) => m,
        Err(err) => {
            return Err(celery::error::TaskError::UnexpectedError(format!(
                "Unable to generate email: {}",
                err
            )))
        }
    };

    conf.transport.send(m).await
}

#[derive(Serialize)]
struct SignatureAppliedContext {
    document_title: String,
    field_label: String,
}

/// Tells the owner a signature landed.
#[celery::task]
pub async fn signature_applied(document: models::Document, field_label: String) -> TaskResult<()> {
    let conf = config();
    let owner = load_owner(&conf, &document)?;

    let (email_html, email_txt) = render_pair(
        "signature_applied",
        &SignatureAppliedContext {
            document_title: document.title.clone(),
            field_label,
        },
    )?;

    let m = match lettre::message::Message::builder()
        .from(from_mailbox(&conf)?)
        .to(mailbox(&owner.email)?)
        .subject(format!("A signature was applied to: {}", document.title))
        .multipart(lettre::message::MultiPart::alternative_plain_html(
            email_txt, email_html,
        )) {
        Ok(m) => m,
        Err(err) => {
            return Err(celery::error::TaskError::UnexpectedError(format!(
                "Unable to generate email: {}",
                err
            )))
        }
    };

    conf.transport.send(m).await
}

#[derive(Serialize)]
struct DocumentCompletedContext {
    document_title: String,
    doc_hash: String,
    trail_hash: String,
}

/// Sends the finished document and its audit trail to the owner and every
/// signer.
#[celery::task]
pub async fn document_completed(document: models::Document) -> TaskResult<()> {
    let conf = config();
    let owner = load_owner(&conf, &document)?;
    let signers = load_signer_emails(&conf, &document)?;

    let trail = make_audit_trail(&document, &conf).await?;
    let file = document
        .signed_file_path
        .as_deref()
        .unwrap_or(&document.file_path)
        .to_string();
    let doc_bytes = read_document_file(&file).await?;
    let doc_hash = hex::encode(hash_slice(&doc_bytes));
    let trail_hash = hex::encode(hash_slice(trail.as_bytes()));

    let (email_html, email_txt) = render_pair(
        "doc_complete",
        &DocumentCompletedContext {
            document_title: document.title.clone(),
            doc_hash,
            trail_hash,
        },
    )?;

    let mut m_build = lettre::message::Message::builder()
        .from(from_mailbox(&conf)?)
        .subject(format!("Fully signed: {}", document.title))
        .to(mailbox(&owner.email)?);
    for signer in signers {
        if signer.eq_ignore_ascii_case(&owner.email) {
            continue;
        }
        m_build = m_build.to(mailbox(&signer)?);
    }

    let m = match m_build.multipart(
        lettre::message::MultiPart::mixed()
            .multipart(lettre::message::MultiPart::alternative_plain_html(
                email_txt, email_html,
            ))
            .singlepart(lettre::message::Attachment::new("document.pdf".to_string()).body(
                doc_bytes,
                lettre::message::header::ContentType::parse("application/pdf").unwrap(),
            ))
            .singlepart(lettre::message::Attachment::new("audit_trail.json".to_string()).body(
                trail,
                lettre::message::header::ContentType::parse("application/json").unwrap(),
            )),
    ) {
        Ok(m) => m,
        Err(err) => {
            return Err(celery::error::TaskError::UnexpectedError(format!(
                "Unable to generate email: {}",
                err
            )))
        }
    };

    conf.transport.send(m).await
}

#[derive(Serialize)]
struct DocumentDeclinedContext {
    document_title: String,
    reason: String,
}

/// Tells the owner the document was declined and why.
#[celery::task]
pub async fn document_declined(document: models::Document, reason: String) -> TaskResult<()> {
    let conf = config();
    let owner = load_owner(&conf, &document)?;

    let (email_html, email_txt) = render_pair(
        "doc_declined",
        &DocumentDeclinedContext {
            document_title: document.title.clone(),
            reason,
        },
    )?;

    let m = match lettre::message::Message::builder()
        .from(from_mailbox(&conf)?)
        .to(mailbox(&owner.email)?)
        .subject(format!("Declined: {}", document.title))
        .multipart(lettre::message::MultiPart::alternative_plain_html(
            email_txt, email_html,
        )) {
        Ok(m) => m,
        Err(err) => {
            return Err(celery::error::TaskError::UnexpectedError(format!(
                "Unable to generate email: {}",
                err
            )))
        }
    };

    conf.transport.send(m).await
}
