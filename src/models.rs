use crate::schema::*;

#[derive(Insertable, Queryable, Identifiable, Serialize, Deserialize, Clone, Debug)]
#[table_name = "users"]
pub struct User {
    pub id: uuid::Uuid,
    pub email: String,
    pub full_name: String,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Insertable, Queryable, Identifiable, Serialize, Deserialize, Clone, Debug)]
#[table_name = "sessions"]
pub struct Session {
    pub id: uuid::Uuid,
    pub user_id: uuid::Uuid,
    pub access_token: String,
    pub expires_at: Option<chrono::NaiveDateTime>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Insertable, Queryable, Identifiable, Serialize, Deserialize, Clone, Debug)]
#[table_name = "documents"]
pub struct Document {
    pub id: uuid::Uuid,
    pub title: String,
    pub file_path: String,
    pub status: DocumentStatus,
    pub signed_file_path: Option<String>,
    pub signing_token: Option<String>,
    pub user_id: uuid::Uuid,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Insertable, Queryable, Identifiable, Serialize, Deserialize, Clone, Debug)]
#[table_name = "signature_fields"]
pub struct SignatureField {
    pub id: uuid::Uuid,
    pub document_id: uuid::Uuid,
    pub page_number: i64,
    pub x_position: f64,
    pub y_position: f64,
    pub width: f64,
    pub height: f64,
    pub signer_email: Option<String>,
    pub status: FieldStatus,
    pub signature_data: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

#[derive(Queryable, Identifiable, Serialize, Clone, Debug)]
#[table_name = "audit_logs"]
pub struct AuditLog {
    pub id: uuid::Uuid,
    pub seq: i64,
    pub document_id: uuid::Uuid,
    pub user_id: Option<uuid::Uuid>,
    pub action: AuditAction,
    pub details: Option<String>,
    #[serde(serialize_with = "ip_only")]
    pub ip_address: ipnetwork::IpNetwork,
    pub user_agent: String,
    pub created_at: chrono::NaiveDateTime,
}

/// Insert form of `AuditLog`; `seq` is assigned by the database sequence.
#[derive(Insertable, Clone, Debug)]
#[table_name = "audit_logs"]
pub struct NewAuditLog {
    pub id: uuid::Uuid,
    pub document_id: uuid::Uuid,
    pub user_id: Option<uuid::Uuid>,
    pub action: AuditAction,
    pub details: Option<String>,
    pub ip_address: ipnetwork::IpNetwork,
    pub user_agent: String,
    pub created_at: chrono::NaiveDateTime,
}

fn ip_only<S: serde::Serializer>(val: &ipnetwork::IpNetwork, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&val.ip().to_string())
}
