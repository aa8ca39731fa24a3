#![crate_type = "rlib"]

#[macro_use]
extern crate rocket;
#[macro_use]
extern crate diesel;
#[macro_use]
extern crate serde;
#[macro_use]
extern crate diesel_derive_enum;
#[macro_use]
extern crate diesel_migrations;

use celery::prelude::*;
use rocket_sync_db_pools::database;
use rocket_sync_db_pools::Poolable;

mod audit;
pub mod auth;
mod fields;
mod files;
mod models;
mod schema;
pub mod tasks;
mod tokens;
pub mod views;
pub mod workflow;

const FILES_DIR: &'static str = "./uploads/";

#[database("db")]
pub struct DbConn(diesel::PgConnection);

embed_migrations!("./migrations");

/// Runs a workflow closure on a pooled connection. Diesel-level failures have
/// already been folded into `WorkflowError` by the closure itself.
pub async fn db_run<
    T: 'static + std::marker::Send,
    F: 'static + FnOnce(&diesel::PgConnection) -> Result<T, workflow::WorkflowError> + std::marker::Send,
>(db: &DbConn, func: F) -> Result<T, workflow::WorkflowError> {
    db.run(move |c| func(c)).await
}

/// UUID-backed identifier rendered with a short type prefix, e.g.
/// `doc_5e57672bcc8e4e5eb33ff338a1f79f4e`. Route parameters accept both the
/// prefixed and the bare form.
macro_rules! typed_uuid {
    ($name:ident, $prefix:literal) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub struct $name {
            pub uuid: uuid::Uuid,
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    uuid: uuid::Uuid::new_v4(),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_fmt(format_args!(
                    "{}_{}",
                    $prefix,
                    self.uuid
                        .to_simple()
                        .encode_lower(&mut uuid::Uuid::encode_buffer())
                ))
            }
        }

        impl From<uuid::Uuid> for $name {
            fn from(uuid: uuid::Uuid) -> Self {
                Self { uuid }
            }
        }

        impl<'a> rocket::request::FromParam<'a> for $name {
            type Error = &'static str;

            fn from_param(param: &'a str) -> Result<Self, Self::Error> {
                match uuid::Uuid::parse_str(
                    param.strip_prefix(concat!($prefix, "_")).unwrap_or(param),
                ) {
                    Ok(id) => Ok($name { uuid: id }),
                    Err(_) => Err("invalid UUID"),
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }
    };
}

typed_uuid!(DocumentID, "doc");
typed_uuid!(FieldID, "field");

#[derive(Deserialize)]
pub struct Config {
    #[serde(deserialize_with = "from_base64")]
    files_key: Vec<u8>,
    celery: CeleryConfig,
    smtp: SMTPConfig,
    external_uri: rocket::http::uri::Reference<'static>,
}

#[derive(Deserialize)]
pub struct CeleryConfig {
    amqp_url: String,
}

#[derive(Deserialize, Clone)]
pub struct SMTPConfig {
    pub server: String,
    pub port: u16,
    pub use_tls: bool,
    pub from_addr: String,
    pub auth: Option<SMTPAuth>,
}

#[derive(Deserialize, Clone)]
pub struct SMTPAuth {
    pub username: String,
    pub password: String,
}

fn from_base64<'a, D: serde::Deserializer<'a>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
    use serde::de::Error;
    use serde::Deserialize;
    String::deserialize(deserializer)
        .and_then(|string| base64::decode(&string).map_err(|err| Error::custom(err.to_string())))
}

pub type CeleryApp = std::sync::Arc<celery::Celery<AMQPBroker>>;

pub struct App {
    pub rocket: rocket::Rocket<rocket::Build>,
    pub celery_app: CeleryApp,
    pub smtp_conf: SMTPConfig,
    pub external_uri: rocket::http::uri::Reference<'static>,
}

pub async fn setup() -> App {
    let rocket = rocket::build();
    let figment = rocket.figment();
    let config = figment.extract::<Config>().expect("Unable to read config");

    let celery_app = celery::app!(
        broker = AMQPBroker { config.celery.amqp_url.clone() },
        tasks = [
            tasks::request_signature,
            tasks::signature_applied,
            tasks::document_completed,
            tasks::document_declined
        ],
        task_routes = [],
        prefetch_count = 2,
        acks_late = true,
        task_retry_for_unexpected = true,
        broker_connection_retry = true,
        broker_connection_timeout = 10,
        heartbeat = Some(10),
    )
    .await
    .expect("Unable to setup Celery app");

    let db_pool = diesel::PgConnection::pool("db", &rocket).unwrap();
    embedded_migrations::run_with_output(&db_pool.get().unwrap(), &mut std::io::stdout()).unwrap();

    App {
        smtp_conf: config.smtp.clone(),
        external_uri: config.external_uri.clone(),
        rocket: rocket.manage(config),
        celery_app,
    }
}
