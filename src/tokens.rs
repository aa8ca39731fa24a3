use diesel::prelude::*;
use rand::Rng;

use crate::{models, schema};

/// Issues a fresh signing token. 64 random bytes, URL-safe base64; rotated on
/// every send, cleared on recall, so at most one token is live per document.
pub fn make_signing_token() -> String {
    base64::encode_config(
        rand::thread_rng()
            .sample_iter(rand::distributions::Standard)
            .take(64)
            .collect::<Vec<u8>>(),
        base64::URL_SAFE_NO_PAD,
    )
}

/// Resolves a token to its document by exact match against the current
/// `signing_token`. Unknown and invalidated tokens are both a plain miss so
/// callers cannot distinguish "no such document" from "stale link".
pub fn find_document(
    c: &diesel::PgConnection,
    token: &str,
) -> diesel::result::QueryResult<Option<models::Document>> {
    schema::documents::dsl::documents
        .filter(schema::documents::dsl::signing_token.eq(token))
        .first::<models::Document>(c)
        .optional()
}

/// Same lookup, but takes the document row lock. Mutations through a token
/// serialize on the document exactly like owner-side mutations.
pub fn lock_document(
    c: &diesel::PgConnection,
    token: &str,
) -> diesel::result::QueryResult<Option<models::Document>> {
    schema::documents::dsl::documents
        .filter(schema::documents::dsl::signing_token.eq(token))
        .for_update()
        .first::<models::Document>(c)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_is_url_safe() {
        let token = make_signing_token();
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn token_encodes_64_bytes() {
        // 64 bytes of entropy, base64 without padding
        assert_eq!(make_signing_token().len(), 86);
    }

    #[test]
    fn tokens_do_not_repeat() {
        let a = make_signing_token();
        let b = make_signing_token();
        assert_ne!(a, b);
    }
}
