use diesel::prelude::*;

use crate::{models, schema, DbConn};

/// Identity supplied by the session collaborator. Sessions are provisioned
/// externally; this guard only verifies the bearer token and resolves the
/// user behind it.
pub struct AuthenticatedUser(pub models::User);

#[rocket::async_trait]
impl<'r> rocket::request::FromRequest<'r> for AuthenticatedUser {
    type Error = &'static str;

    async fn from_request(
        request: &'r rocket::Request<'_>,
    ) -> rocket::request::Outcome<Self, Self::Error> {
        let token = match request
            .headers()
            .get_one("Authorization")
            .and_then(|h| h.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        {
            Some(t) => t,
            None => {
                return rocket::request::Outcome::Failure((
                    rocket::http::Status::Unauthorized,
                    "Missing bearer token",
                ))
            }
        };

        let db = match request.guard::<DbConn>().await {
            rocket::request::Outcome::Success(db) => db,
            rocket::request::Outcome::Forward(f) => return rocket::request::Outcome::Forward(f),
            rocket::request::Outcome::Failure(_) => {
                return rocket::request::Outcome::Failure((
                    rocket::http::Status::InternalServerError,
                    "Unable to get DB connection",
                ))
            }
        };

        let session = match db
            .run(move |c| {
                schema::sessions::dsl::sessions
                    .inner_join(schema::users::dsl::users)
                    .filter(schema::sessions::dsl::access_token.eq(token))
                    .first::<(models::Session, models::User)>(c)
                    .optional()
            })
            .await
        {
            Ok(s) => s,
            Err(e) => {
                warn!("DB error: {}", e);
                return rocket::request::Outcome::Failure((
                    rocket::http::Status::InternalServerError,
                    "Unable to look up session",
                ));
            }
        };

        match session {
            Some((session, user)) => {
                if let Some(expires_at) = session.expires_at {
                    if expires_at < chrono::Utc::now().naive_utc() {
                        return rocket::request::Outcome::Failure((
                            rocket::http::Status::Unauthorized,
                            "Session expired",
                        ));
                    }
                }
                rocket::request::Outcome::Success(AuthenticatedUser(user))
            }
            None => rocket::request::Outcome::Failure((
                rocket::http::Status::Unauthorized,
                "Invalid session token",
            )),
        }
    }
}
