#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Draft,
    Pending,
    Completed,
    Declined,
}

impl ToString for DocumentStatus {
    fn to_string(&self) -> String {
        match self {
            Self::Draft => "draft",
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Declined => "declined",
        }
        .to_string()
    }
}

#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldStatus {
    Unsigned,
    Signed,
}

impl ToString for FieldStatus {
    fn to_string(&self) -> String {
        match self {
            Self::Unsigned => "unsigned",
            Self::Signed => "signed",
        }
        .to_string()
    }
}

#[derive(DbEnum, Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Upload,
    Send,
    Sign,
    Decline,
    Recall,
    Complete,
    Download,
}

impl ToString for AuditAction {
    fn to_string(&self) -> String {
        match self {
            Self::Upload => "upload",
            Self::Send => "send",
            Self::Sign => "sign",
            Self::Decline => "decline",
            Self::Recall => "recall",
            Self::Complete => "complete",
            Self::Download => "download",
        }
        .to_string()
    }
}

table! {
    users (id) {
        id -> Uuid,
        email -> Varchar,
        full_name -> Varchar,
        created_at -> Timestamp,
    }
}

table! {
    sessions (id) {
        id -> Uuid,
        user_id -> Uuid,
        access_token -> Varchar,
        expires_at -> Nullable<Timestamp>,
        created_at -> Timestamp,
    }
}

table! {
    documents (id) {
        id -> Uuid,
        title -> Varchar,
        file_path -> Varchar,
        status -> crate::schema::DocumentStatusMapping,
        signed_file_path -> Nullable<Varchar>,
        signing_token -> Nullable<Varchar>,
        user_id -> Uuid,
        created_at -> Timestamp,
    }
}

table! {
    signature_fields (id) {
        id -> Uuid,
        document_id -> Uuid,
        page_number -> Int8,
        x_position -> Float8,
        y_position -> Float8,
        width -> Float8,
        height -> Float8,
        signer_email -> Nullable<Varchar>,
        status -> crate::schema::FieldStatusMapping,
        signature_data -> Nullable<Text>,
        created_at -> Timestamp,
    }
}

table! {
    audit_logs (id) {
        id -> Uuid,
        seq -> Int8,
        document_id -> Uuid,
        user_id -> Nullable<Uuid>,
        action -> crate::schema::AuditActionMapping,
        details -> Nullable<Varchar>,
        ip_address -> Inet,
        user_agent -> Varchar,
        created_at -> Timestamp,
    }
}

joinable!(sessions -> users (user_id));
joinable!(documents -> users (user_id));
joinable!(signature_fields -> documents (document_id));
joinable!(audit_logs -> documents (document_id));

allow_tables_to_appear_in_same_query!(users, sessions, documents, signature_fields, audit_logs,);
