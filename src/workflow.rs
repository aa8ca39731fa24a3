use diesel::prelude::*;

use crate::views::ClientMeta;
use crate::{audit, fields, models, schema, tokens, FieldID};

/// Who is driving a transition. Token holders carry no user identity; their
/// capability is the signing token itself.
#[derive(Debug, Clone)]
pub enum Actor {
    User(models::User),
    TokenHolder,
}

impl Actor {
    pub fn user_id(&self) -> Option<uuid::Uuid> {
        match self {
            Actor::User(u) => Some(u.id),
            Actor::TokenHolder => None,
        }
    }
}

/// How a caller addresses a document: owners by id, anonymous signers by
/// token. Token resolution failures are reported exactly like a missing
/// document.
#[derive(Debug, Clone)]
pub enum DocumentRef {
    Id(uuid::Uuid),
    Token(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkflowError {
    NotFound(String),
    StateConflict(String),
    Validation(String),
    Authorization(String),
    Storage,
}

impl From<diesel::result::Error> for WorkflowError {
    fn from(e: diesel::result::Error) -> Self {
        warn!("DB error: {}", e);
        WorkflowError::Storage
    }
}

pub type WorkflowResult<T> = Result<T, WorkflowError>;

fn document_not_found() -> WorkflowError {
    WorkflowError::NotFound("Document not found".to_string())
}

fn field_not_found() -> WorkflowError {
    WorkflowError::NotFound("Field not found".to_string())
}

/// A document together with everything a caller sees: its fields in display
/// order and its history, newest first.
#[derive(Debug, Clone)]
pub struct DocumentView {
    pub document: models::Document,
    pub fields: Vec<models::SignatureField>,
    pub audit_entries: Vec<models::AuditLog>,
}

/// Result of signing one field. `completed` is true when this signature was
/// the last one outstanding and the document moved to completed in the same
/// transaction.
#[derive(Debug, Clone)]
pub struct SignOutcome {
    pub document: models::Document,
    pub field: models::SignatureField,
    pub completed: bool,
}

// --- guards ---------------------------------------------------------------
//
// Pure checks over already-loaded rows. Transitions call these while holding
// the document row lock, so the state they see cannot move underneath them.

pub fn ensure_owner(document: &models::Document, user: &models::User) -> WorkflowResult<()> {
    if document.user_id != user.id {
        return Err(WorkflowError::Authorization("Not authorized".to_string()));
    }
    Ok(())
}

pub fn ensure_fields_editable(document: &models::Document) -> WorkflowResult<()> {
    match document.status {
        schema::DocumentStatus::Draft | schema::DocumentStatus::Pending => Ok(()),
        s => Err(WorkflowError::StateConflict(format!(
            "Fields cannot be modified on a {} document",
            s.to_string()
        ))),
    }
}

pub fn ensure_send_allowed(document: &models::Document, field_count: i64) -> WorkflowResult<()> {
    if document.status != schema::DocumentStatus::Draft {
        return Err(WorkflowError::StateConflict(format!(
            "Only draft documents can be sent, this one is {}",
            document.status.to_string()
        )));
    }
    if field_count == 0 {
        return Err(WorkflowError::Validation(
            "Document has no signature fields".to_string(),
        ));
    }
    Ok(())
}

pub fn ensure_sign_allowed(
    document: &models::Document,
    field: &models::SignatureField,
    actor: &Actor,
) -> WorkflowResult<()> {
    if document.status != schema::DocumentStatus::Pending {
        return Err(WorkflowError::StateConflict(format!(
            "Document is {}",
            document.status.to_string()
        )));
    }
    if field.status == schema::FieldStatus::Signed {
        return Err(WorkflowError::StateConflict(
            "Field is already signed".to_string(),
        ));
    }
    // An assigned field only accepts its assignee through a session; the
    // token route is the capability for anonymous signers.
    if let Actor::User(user) = actor {
        if let Some(assigned) = field.signer_email.as_deref().filter(|e| !e.is_empty()) {
            if !assigned.eq_ignore_ascii_case(&user.email) {
                return Err(WorkflowError::Authorization(format!(
                    "This field is assigned to {}",
                    assigned
                )));
            }
        }
    }
    Ok(())
}

pub fn ensure_decline_allowed(document: &models::Document) -> WorkflowResult<()> {
    if document.status != schema::DocumentStatus::Pending {
        return Err(WorkflowError::StateConflict(format!(
            "Only pending documents can be declined, this one is {}",
            document.status.to_string()
        )));
    }
    Ok(())
}

/// Session callers may decline as the owner or as an assigned signer.
pub fn may_decline(
    document: &models::Document,
    doc_fields: &[models::SignatureField],
    user: &models::User,
) -> WorkflowResult<()> {
    if document.user_id == user.id {
        return Ok(());
    }
    let is_signer = doc_fields.iter().any(|f| {
        f.signer_email
            .as_deref()
            .map_or(false, |e| e.eq_ignore_ascii_case(&user.email))
    });
    if !is_signer {
        return Err(WorkflowError::Authorization(
            "Not authorized to decline this document".to_string(),
        ));
    }
    Ok(())
}

pub fn ensure_recall_allowed(document: &models::Document) -> WorkflowResult<()> {
    match document.status {
        schema::DocumentStatus::Pending | schema::DocumentStatus::Declined => Ok(()),
        s => Err(WorkflowError::StateConflict(format!(
            "Only pending or declined documents can be recalled, this one is {}",
            s.to_string()
        ))),
    }
}

pub fn ensure_download_allowed(document: &models::Document) -> WorkflowResult<()> {
    if document.status != schema::DocumentStatus::Completed {
        return Err(WorkflowError::StateConflict(format!(
            "Document is not completed, it is {}",
            document.status.to_string()
        )));
    }
    Ok(())
}

fn decline_details(actor: &Actor, reason: &str) -> String {
    match actor {
        Actor::User(_) => format!("Document declined. Reason: {}", reason),
        Actor::TokenHolder => {
            format!("Document declined via public link. Reason: {}", reason)
        }
    }
}

fn validate_signer_email(email: &str) -> WorkflowResult<()> {
    email
        .parse::<lettre::address::Address>()
        .map(|_| ())
        .map_err(|_| {
            WorkflowError::Validation(format!("'{}' is not a valid email address", email))
        })
}

// --- row locking ----------------------------------------------------------

/// Loads the document and takes its row lock. Every mutating transition goes
/// through here first, which serializes writers per document while leaving
/// unrelated documents untouched.
fn lock_document(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> WorkflowResult<models::Document> {
    schema::documents::dsl::documents
        .find(document_id)
        .for_update()
        .first::<models::Document>(c)
        .optional()?
        .ok_or_else(document_not_found)
}

fn lock_document_ref(
    c: &diesel::PgConnection,
    document: &DocumentRef,
) -> WorkflowResult<models::Document> {
    match document {
        DocumentRef::Id(id) => lock_document(c, *id),
        DocumentRef::Token(token) => {
            tokens::lock_document(c, token)?.ok_or_else(document_not_found)
        }
    }
}

// --- transitions ----------------------------------------------------------
//
// Each transition is one transaction: row lock, guards, mutation, audit.
// Nothing is written when a guard fails.

pub fn upload_document(
    c: &diesel::PgConnection,
    user: &models::User,
    title: &str,
    file_path: &str,
    client_meta: &ClientMeta,
) -> WorkflowResult<models::Document> {
    if title.trim().is_empty() {
        return Err(WorkflowError::Validation(
            "Document title must not be empty".to_string(),
        ));
    }
    let document = models::Document {
        id: uuid::Uuid::new_v4(),
        title: title.to_string(),
        file_path: file_path.to_string(),
        status: schema::DocumentStatus::Draft,
        signed_file_path: None,
        signing_token: None,
        user_id: user.id,
        created_at: chrono::Utc::now().naive_utc(),
    };
    c.transaction(|| {
        diesel::insert_into(schema::documents::dsl::documents)
            .values(&document)
            .execute(c)?;
        audit::append(
            c,
            audit::entry(
                document.id,
                Some(user.id),
                schema::AuditAction::Upload,
                format!("Document '{}' uploaded", document.title),
                client_meta,
            ),
        )?;
        Ok(document.clone())
    })
}

pub fn add_field(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
    placement: fields::Placement,
    signer_email: Option<String>,
) -> WorkflowResult<models::SignatureField> {
    placement.validate()?;
    let signer_email = match signer_email.filter(|e| !e.is_empty()) {
        Some(e) => {
            validate_signer_email(&e)?;
            Some(e)
        }
        None => None,
    };
    c.transaction(|| {
        let document = lock_document(c, document_id)?;
        ensure_owner(&document, user)?;
        ensure_fields_editable(&document)?;
        Ok(fields::create(c, document.id, placement, signer_email)?)
    })
}

pub fn update_field(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
    field_id: uuid::Uuid,
    signer_email: Option<String>,
) -> WorkflowResult<models::SignatureField> {
    c.transaction(|| {
        let document = lock_document(c, document_id)?;
        ensure_owner(&document, user)?;
        ensure_fields_editable(&document)?;
        let field = fields::get(c, document.id, field_id)?.ok_or_else(field_not_found)?;
        if field.status == schema::FieldStatus::Signed {
            return Err(WorkflowError::StateConflict(
                "Field is already signed".to_string(),
            ));
        }
        // Absent means leave as-is, empty means clear the assignment.
        match signer_email {
            None => Ok(field),
            Some(e) if e.is_empty() => Ok(fields::assign(c, field.id, None)?),
            Some(e) => {
                validate_signer_email(&e)?;
                Ok(fields::assign(c, field.id, Some(e))?)
            }
        }
    })
}

pub fn delete_field(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
    field_id: uuid::Uuid,
) -> WorkflowResult<()> {
    c.transaction(|| {
        let document = lock_document(c, document_id)?;
        ensure_owner(&document, user)?;
        ensure_fields_editable(&document)?;
        let field = fields::get(c, document.id, field_id)?.ok_or_else(field_not_found)?;
        if field.status == schema::FieldStatus::Signed {
            return Err(WorkflowError::StateConflict(
                "Signed fields cannot be deleted".to_string(),
            ));
        }
        // A pending document must stay signable.
        if document.status == schema::DocumentStatus::Pending
            && fields::count(c, document.id)? <= 1
        {
            return Err(WorkflowError::Validation(
                "A pending document must retain at least one signature field".to_string(),
            ));
        }
        fields::delete(c, field.id)?;
        Ok(())
    })
}

/// Moves a draft out for signing: fresh token, status pending, audit entry.
/// Returns the fields too so the caller can fan out signer notifications.
pub fn send_document(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
    client_meta: &ClientMeta,
) -> WorkflowResult<(models::Document, Vec<models::SignatureField>)> {
    c.transaction(|| {
        let document = lock_document(c, document_id)?;
        ensure_owner(&document, user)?;
        let doc_fields = fields::list(c, document.id)?;
        ensure_send_allowed(&document, doc_fields.len() as i64)?;
        // A new token on every send; links from a previous round are dead.
        let document: models::Document =
            diesel::update(schema::documents::dsl::documents.find(document.id))
                .set((
                    schema::documents::dsl::status.eq(schema::DocumentStatus::Pending),
                    schema::documents::dsl::signing_token.eq(Some(tokens::make_signing_token())),
                ))
                .get_result(c)?;
        audit::append(
            c,
            audit::entry(
                document.id,
                Some(user.id),
                schema::AuditAction::Send,
                "Document sent for signing".to_string(),
                client_meta,
            ),
        )?;
        Ok((document, doc_fields))
    })
}

pub fn sign_field(
    c: &diesel::PgConnection,
    actor: &Actor,
    document: &DocumentRef,
    field_id: uuid::Uuid,
    signature_data: &str,
    client_meta: &ClientMeta,
) -> WorkflowResult<SignOutcome> {
    if signature_data.is_empty() {
        return Err(WorkflowError::Validation(
            "signature_data must not be empty".to_string(),
        ));
    }
    c.transaction(|| {
        let document = lock_document_ref(c, document)?;
        let field = fields::get(c, document.id, field_id)?.ok_or_else(field_not_found)?;
        ensure_sign_allowed(&document, &field, actor)?;
        let field = fields::record_signature(c, field.id, signature_data)?;
        let sign_details = match actor {
            Actor::User(_) => format!("Signature applied to field {}", FieldID::from(field.id)),
            Actor::TokenHolder => format!(
                "Signature applied via public link (field {})",
                FieldID::from(field.id)
            ),
        };
        audit::append(
            c,
            audit::entry(
                document.id,
                actor.user_id(),
                schema::AuditAction::Sign,
                sign_details,
                client_meta,
            ),
        )?;

        // Completion check runs under the same row lock that the signature
        // update took, so two signers racing on the last two fields cannot
        // both observe zero unsigned fields.
        if fields::unsigned_count(c, document.id)? == 0 {
            let document: models::Document =
                diesel::update(schema::documents::dsl::documents.find(document.id))
                    .set((
                        schema::documents::dsl::status.eq(schema::DocumentStatus::Completed),
                        schema::documents::dsl::signed_file_path
                            .eq(Some(document.file_path.clone())),
                    ))
                    .get_result(c)?;
            audit::append(
                c,
                audit::entry(
                    document.id,
                    actor.user_id(),
                    schema::AuditAction::Complete,
                    "All fields signed. Document completed.".to_string(),
                    client_meta,
                ),
            )?;
            return Ok(SignOutcome {
                document,
                field,
                completed: true,
            });
        }

        Ok(SignOutcome {
            document,
            field,
            completed: false,
        })
    })
}

pub fn decline_document(
    c: &diesel::PgConnection,
    actor: &Actor,
    document: &DocumentRef,
    reason: &str,
    client_meta: &ClientMeta,
) -> WorkflowResult<models::Document> {
    c.transaction(|| {
        let document = lock_document_ref(c, document)?;
        ensure_decline_allowed(&document)?;
        if let Actor::User(user) = actor {
            let doc_fields = fields::list(c, document.id)?;
            may_decline(&document, &doc_fields, user)?;
        }
        let document: models::Document =
            diesel::update(schema::documents::dsl::documents.find(document.id))
                .set(schema::documents::dsl::status.eq(schema::DocumentStatus::Declined))
                .get_result(c)?;
        audit::append(
            c,
            audit::entry(
                document.id,
                actor.user_id(),
                schema::AuditAction::Decline,
                decline_details(actor, reason),
                client_meta,
            ),
        )?;
        Ok(document)
    })
}

/// Pulls a sent or declined document back to draft. Every field is reset,
/// signatures are wiped, and the signing token is invalidated so old links
/// stop resolving.
pub fn recall_document(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
    client_meta: &ClientMeta,
) -> WorkflowResult<models::Document> {
    c.transaction(|| {
        let document = lock_document(c, document_id)?;
        ensure_owner(&document, user)?;
        ensure_recall_allowed(&document)?;
        fields::reset_all(c, document.id)?;
        let document: models::Document =
            diesel::update(schema::documents::dsl::documents.find(document.id))
                .set((
                    schema::documents::dsl::status.eq(schema::DocumentStatus::Draft),
                    schema::documents::dsl::signing_token.eq(None::<String>),
                    schema::documents::dsl::signed_file_path.eq(None::<String>),
                ))
                .get_result(c)?;
        audit::append(
            c,
            audit::entry(
                document.id,
                Some(user.id),
                schema::AuditAction::Recall,
                "Document recalled to draft. Signatures cleared.".to_string(),
                client_meta,
            ),
        )?;
        Ok(document)
    })
}

/// Records the download and hands back the document so the facade can stream
/// the signed artifact. The entry commits before any bytes are served.
pub fn download_document(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
    client_meta: &ClientMeta,
) -> WorkflowResult<models::Document> {
    c.transaction(|| {
        let document = lock_document(c, document_id)?;
        ensure_owner(&document, user)?;
        ensure_download_allowed(&document)?;
        audit::append(
            c,
            audit::entry(
                document.id,
                Some(user.id),
                schema::AuditAction::Download,
                format!("Signed document '{}' downloaded", document.title),
                client_meta,
            ),
        )?;
        Ok(document)
    })
}

// --- reads ----------------------------------------------------------------

pub fn fetch_document(
    c: &diesel::PgConnection,
    user: &models::User,
    document_id: uuid::Uuid,
) -> WorkflowResult<DocumentView> {
    c.transaction(|| {
        let document = schema::documents::dsl::documents
            .find(document_id)
            .first::<models::Document>(c)
            .optional()?
            .ok_or_else(document_not_found)?;
        ensure_owner(&document, user)?;
        let doc_fields = fields::list(c, document.id)?;
        let audit_entries = audit::list(c, document.id)?;
        Ok(DocumentView {
            document,
            fields: doc_fields,
            audit_entries,
        })
    })
}

pub fn fetch_document_by_token(
    c: &diesel::PgConnection,
    token: &str,
) -> WorkflowResult<DocumentView> {
    c.transaction(|| {
        let document = tokens::find_document(c, token)?.ok_or_else(document_not_found)?;
        let doc_fields = fields::list(c, document.id)?;
        let audit_entries = audit::list(c, document.id)?;
        Ok(DocumentView {
            document,
            fields: doc_fields,
            audit_entries,
        })
    })
}

pub fn list_documents(
    c: &diesel::PgConnection,
    user: &models::User,
) -> WorkflowResult<Vec<DocumentView>> {
    c.transaction(|| {
        let docs = schema::documents::dsl::documents
            .filter(schema::documents::dsl::user_id.eq(user.id))
            .order(schema::documents::dsl::created_at.desc())
            .load::<models::Document>(c)?;
        let mut views = Vec::with_capacity(docs.len());
        for document in docs {
            let doc_fields = fields::list(c, document.id)?;
            let audit_entries = audit::list(c, document.id)?;
            views.push(DocumentView {
                document,
                fields: doc_fields,
                audit_entries,
            });
        }
        Ok(views)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> models::User {
        models::User {
            id: uuid::Uuid::new_v4(),
            email: email.to_string(),
            full_name: "Test User".to_string(),
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    fn document(owner: &models::User, status: schema::DocumentStatus) -> models::Document {
        models::Document {
            id: uuid::Uuid::new_v4(),
            title: "Contract".to_string(),
            file_path: "abc.pdf".to_string(),
            status,
            signed_file_path: None,
            signing_token: None,
            user_id: owner.id,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    fn field(
        document: &models::Document,
        status: schema::FieldStatus,
        signer_email: Option<&str>,
    ) -> models::SignatureField {
        models::SignatureField {
            id: uuid::Uuid::new_v4(),
            document_id: document.id,
            page_number: 1,
            x_position: 100.0,
            y_position: 100.0,
            width: 150.0,
            height: 60.0,
            signer_email: signer_email.map(str::to_string),
            status,
            signature_data: None,
            created_at: chrono::Utc::now().naive_utc(),
        }
    }

    #[test]
    fn owner_check() {
        let owner = user("owner@example.com");
        let other = user("other@example.com");
        let doc = document(&owner, schema::DocumentStatus::Draft);
        assert!(ensure_owner(&doc, &owner).is_ok());
        assert!(matches!(
            ensure_owner(&doc, &other),
            Err(WorkflowError::Authorization(_))
        ));
    }

    #[test]
    fn fields_editable_in_draft_and_pending_only() {
        let owner = user("owner@example.com");
        for status in [
            schema::DocumentStatus::Draft,
            schema::DocumentStatus::Pending,
        ] {
            assert!(ensure_fields_editable(&document(&owner, status)).is_ok());
        }
        for status in [
            schema::DocumentStatus::Completed,
            schema::DocumentStatus::Declined,
        ] {
            assert!(matches!(
                ensure_fields_editable(&document(&owner, status)),
                Err(WorkflowError::StateConflict(_))
            ));
        }
    }

    #[test]
    fn send_requires_draft() {
        let owner = user("owner@example.com");
        assert!(ensure_send_allowed(&document(&owner, schema::DocumentStatus::Draft), 2).is_ok());
        for status in [
            schema::DocumentStatus::Pending,
            schema::DocumentStatus::Completed,
            schema::DocumentStatus::Declined,
        ] {
            assert!(matches!(
                ensure_send_allowed(&document(&owner, status), 2),
                Err(WorkflowError::StateConflict(_))
            ));
        }
    }

    #[test]
    fn send_requires_at_least_one_field() {
        let owner = user("owner@example.com");
        let doc = document(&owner, schema::DocumentStatus::Draft);
        assert!(matches!(
            ensure_send_allowed(&doc, 0),
            Err(WorkflowError::Validation(_))
        ));
    }

    #[test]
    fn sign_requires_pending_document() {
        let owner = user("owner@example.com");
        let actor = Actor::TokenHolder;
        for status in [
            schema::DocumentStatus::Draft,
            schema::DocumentStatus::Completed,
            schema::DocumentStatus::Declined,
        ] {
            let doc = document(&owner, status);
            let f = field(&doc, schema::FieldStatus::Unsigned, None);
            assert!(matches!(
                ensure_sign_allowed(&doc, &f, &actor),
                Err(WorkflowError::StateConflict(_))
            ));
        }
    }

    #[test]
    fn signing_twice_is_a_conflict() {
        let owner = user("owner@example.com");
        let doc = document(&owner, schema::DocumentStatus::Pending);
        let f = field(&doc, schema::FieldStatus::Signed, None);
        assert_eq!(
            ensure_sign_allowed(&doc, &f, &Actor::TokenHolder),
            Err(WorkflowError::StateConflict(
                "Field is already signed".to_string()
            ))
        );
    }

    #[test]
    fn assigned_field_rejects_other_sessions() {
        let owner = user("owner@example.com");
        let doc = document(&owner, schema::DocumentStatus::Pending);
        let f = field(&doc, schema::FieldStatus::Unsigned, Some("alice@example.com"));
        let stranger = Actor::User(user("bob@example.com"));
        assert!(matches!(
            ensure_sign_allowed(&doc, &f, &stranger),
            Err(WorkflowError::Authorization(_))
        ));
    }

    #[test]
    fn assignment_match_is_case_insensitive() {
        let owner = user("owner@example.com");
        let doc = document(&owner, schema::DocumentStatus::Pending);
        let f = field(&doc, schema::FieldStatus::Unsigned, Some("Alice@Example.com"));
        let alice = Actor::User(user("alice@example.com"));
        assert!(ensure_sign_allowed(&doc, &f, &alice).is_ok());
    }

    #[test]
    fn unassigned_field_accepts_any_session() {
        let owner = user("owner@example.com");
        let doc = document(&owner, schema::DocumentStatus::Pending);
        let f = field(&doc, schema::FieldStatus::Unsigned, None);
        assert!(ensure_sign_allowed(&doc, &f, &Actor::User(user("bob@example.com"))).is_ok());
    }

    #[test]
    fn token_holder_bypasses_assignment() {
        let owner = user("owner@example.com");
        let doc = document(&owner, schema::DocumentStatus::Pending);
        let f = field(&doc, schema::FieldStatus::Unsigned, Some("alice@example.com"));
        assert!(ensure_sign_allowed(&doc, &f, &Actor::TokenHolder).is_ok());
    }

    #[test]
    fn decline_requires_pending() {
        let owner = user("owner@example.com");
        assert!(ensure_decline_allowed(&document(&owner, schema::DocumentStatus::Pending)).is_ok());
        for status in [
            schema::DocumentStatus::Draft,
            schema::DocumentStatus::Completed,
            schema::DocumentStatus::Declined,
        ] {
            assert!(matches!(
                ensure_decline_allowed(&document(&owner, status)),
                Err(WorkflowError::StateConflict(_))
            ));
        }
    }

    #[test]
    fn decline_permitted_for_owner_and_assigned_signer() {
        let owner = user("owner@example.com");
        let signer = user("alice@example.com");
        let stranger = user("bob@example.com");
        let doc = document(&owner, schema::DocumentStatus::Pending);
        let doc_fields = vec![field(
            &doc,
            schema::FieldStatus::Unsigned,
            Some("alice@example.com"),
        )];
        assert!(may_decline(&doc, &doc_fields, &owner).is_ok());
        assert!(may_decline(&doc, &doc_fields, &signer).is_ok());
        assert!(matches!(
            may_decline(&doc, &doc_fields, &stranger),
            Err(WorkflowError::Authorization(_))
        ));
    }

    #[test]
    fn recall_covers_pending_and_declined() {
        let owner = user("owner@example.com");
        for status in [
            schema::DocumentStatus::Pending,
            schema::DocumentStatus::Declined,
        ] {
            assert!(ensure_recall_allowed(&document(&owner, status)).is_ok());
        }
        for status in [
            schema::DocumentStatus::Draft,
            schema::DocumentStatus::Completed,
        ] {
            assert!(matches!(
                ensure_recall_allowed(&document(&owner, status)),
                Err(WorkflowError::StateConflict(_))
            ));
        }
    }

    #[test]
    fn download_requires_completed() {
        let owner = user("owner@example.com");
        assert!(
            ensure_download_allowed(&document(&owner, schema::DocumentStatus::Completed)).is_ok()
        );
        for status in [
            schema::DocumentStatus::Draft,
            schema::DocumentStatus::Pending,
            schema::DocumentStatus::Declined,
        ] {
            assert!(matches!(
                ensure_download_allowed(&document(&owner, status)),
                Err(WorkflowError::StateConflict(_))
            ));
        }
    }

    #[test]
    fn decline_details_name_the_route() {
        let session = decline_details(&Actor::User(user("a@example.com")), "not mine");
        assert_eq!(session, "Document declined. Reason: not mine");
        let public = decline_details(&Actor::TokenHolder, "not mine");
        assert_eq!(
            public,
            "Document declined via public link. Reason: not mine"
        );
    }

    #[test]
    fn signer_email_validation() {
        assert!(validate_signer_email("alice@example.com").is_ok());
        assert!(matches!(
            validate_signer_email("not-an-email"),
            Err(WorkflowError::Validation(_))
        ));
    }
}
