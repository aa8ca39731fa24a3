use diesel::prelude::*;

use crate::views::ClientMeta;
use crate::{models, schema};

/// Builds an audit row for a transition. `user_id` is None when the actor is
/// an anonymous token holder.
pub fn entry(
    document_id: uuid::Uuid,
    user_id: Option<uuid::Uuid>,
    action: schema::AuditAction,
    details: String,
    client_meta: &ClientMeta,
) -> models::NewAuditLog {
    models::NewAuditLog {
        id: uuid::Uuid::new_v4(),
        document_id,
        user_id,
        action,
        details: Some(details),
        ip_address: client_meta.ip.into(),
        user_agent: client_meta.user_agent.clone(),
        created_at: chrono::Utc::now().naive_utc(),
    }
}

/// Appends one entry. Must run inside the transaction of the transition it
/// records; the log and the state change commit or roll back together.
pub fn append(
    c: &diesel::PgConnection,
    entry: models::NewAuditLog,
) -> diesel::result::QueryResult<()> {
    diesel::insert_into(schema::audit_logs::dsl::audit_logs)
        .values(&entry)
        .execute(c)?;
    Ok(())
}

/// History of a document, newest first. `seq` breaks ties between entries
/// written in the same transaction.
pub fn list(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> diesel::result::QueryResult<Vec<models::AuditLog>> {
    schema::audit_logs::dsl::audit_logs
        .filter(schema::audit_logs::dsl::document_id.eq(document_id))
        .order((
            schema::audit_logs::dsl::created_at.desc(),
            schema::audit_logs::dsl::seq.desc(),
        ))
        .load::<models::AuditLog>(c)
}

/// Oldest-first variant used when exporting the trail alongside a finished
/// document.
pub fn list_chronological(
    c: &diesel::PgConnection,
    document_id: uuid::Uuid,
) -> diesel::result::QueryResult<Vec<models::AuditLog>> {
    schema::audit_logs::dsl::audit_logs
        .filter(schema::audit_logs::dsl::document_id.eq(document_id))
        .order((
            schema::audit_logs::dsl::created_at.asc(),
            schema::audit_logs::dsl::seq.asc(),
        ))
        .load::<models::AuditLog>(c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> ClientMeta {
        ClientMeta {
            ip: "192.0.2.7".parse().unwrap(),
            user_agent: "test-agent".to_string(),
        }
    }

    #[test]
    fn entry_records_actor() {
        let doc_id = uuid::Uuid::new_v4();
        let user_id = uuid::Uuid::new_v4();
        let e = entry(
            doc_id,
            Some(user_id),
            schema::AuditAction::Send,
            "Document sent for signing".to_string(),
            &meta(),
        );
        assert_eq!(e.document_id, doc_id);
        assert_eq!(e.user_id, Some(user_id));
        assert_eq!(e.action, schema::AuditAction::Send);
        assert_eq!(e.details.as_deref(), Some("Document sent for signing"));
        assert_eq!(e.user_agent, "test-agent");
    }

    #[test]
    fn anonymous_entry_has_no_user() {
        let e = entry(
            uuid::Uuid::new_v4(),
            None,
            schema::AuditAction::Sign,
            "Signature applied via public link".to_string(),
            &meta(),
        );
        assert_eq!(e.user_id, None);
    }
}
