use hmac::{Mac, NewMac};

use crate::Config;

type HmacSha512 = hmac::Hmac<sha2::Sha512>;

/// Expiring capability for one stored file, handed out inside document
/// responses and checked again on fetch. Keys outlive neither their window
/// nor a change of `files_key`.
pub struct FileKey<'a> {
    file_path: &'a str,
    key: &'a [u8],
}

const KEY_VALIDITY_MINUTES: i64 = 10;

impl<'a> FileKey<'a> {
    pub fn new(file_path: &'a str, key: &'a [u8]) -> FileKey<'a> {
        FileKey { file_path, key }
    }

    fn code(&self, expiry: &str) -> String {
        let file_path = base64::encode_config(self.file_path.as_bytes(), base64::URL_SAFE_NO_PAD);
        let mut mac = HmacSha512::new_from_slice(self.key).unwrap();
        mac.update(format!("{};{}", file_path, expiry).as_bytes());
        base64::encode_config(mac.finalize().into_bytes(), base64::URL_SAFE_NO_PAD)
    }

    /// Checks a presented `<expiry>;<mac>` key against this file.
    pub fn verify(&self, presented: &str) -> bool {
        let (expiry, code) = match presented.split_once(';') {
            Some(parts) => parts,
            None => return false,
        };
        let expiry_ts = match expiry.parse::<i64>() {
            Ok(t) => t,
            Err(_) => return false,
        };
        let expires_at = match chrono::NaiveDateTime::from_timestamp_opt(expiry_ts, 0) {
            Some(t) => chrono::DateTime::<chrono::Utc>::from_utc(t, chrono::Utc),
            None => return false,
        };
        if expires_at < chrono::Utc::now() {
            return false;
        }
        let presented_code = match base64::decode_config(code, base64::URL_SAFE_NO_PAD) {
            Ok(c) => c,
            Err(_) => return false,
        };
        let file_path = base64::encode_config(self.file_path.as_bytes(), base64::URL_SAFE_NO_PAD);
        let mut mac = HmacSha512::new_from_slice(self.key).unwrap();
        mac.update(format!("{};{}", file_path, expiry).as_bytes());
        mac.verify(&presented_code).is_ok()
    }
}

impl ToString for FileKey<'_> {
    fn to_string(&self) -> String {
        let expiry = (chrono::Utc::now() + chrono::Duration::minutes(KEY_VALIDITY_MINUTES))
            .timestamp()
            .to_string();
        let code = self.code(&expiry);
        format!("{};{}", expiry, code)
    }
}

/// Persists an uploaded PDF under a fresh opaque name and returns the stored
/// file name. The original client file name never reaches disk.
pub async fn store_upload(file: &mut rocket::fs::TempFile<'_>) -> std::io::Result<String> {
    let name = format!("{}.pdf", uuid::Uuid::new_v4());
    tokio::fs::create_dir_all(crate::FILES_DIR).await?;
    file.copy_to(std::path::Path::new(crate::FILES_DIR).join(&name))
        .await?;
    Ok(name)
}

#[get("/uploads/<file..>?<key>")]
pub async fn uploads(
    file: std::path::PathBuf,
    key: &str,
    config: &rocket::State<Config>,
) -> Result<Option<rocket::fs::NamedFile>, rocket::http::Status> {
    let file_path = file.to_string_lossy();
    if !FileKey::new(&file_path, &config.files_key).verify(key) {
        return Err(rocket::http::Status::Forbidden);
    }

    Ok(
        rocket::fs::NamedFile::open(std::path::Path::new(crate::FILES_DIR).join(&file))
            .await
            .ok(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips() {
        let secret = b"0123456789abcdef";
        let key = FileKey::new("abc.pdf", secret).to_string();
        assert!(FileKey::new("abc.pdf", secret).verify(&key));
    }

    #[test]
    fn key_is_bound_to_the_file() {
        let secret = b"0123456789abcdef";
        let key = FileKey::new("abc.pdf", secret).to_string();
        assert!(!FileKey::new("other.pdf", secret).verify(&key));
    }

    #[test]
    fn key_is_bound_to_the_secret() {
        let key = FileKey::new("abc.pdf", b"secret-one").to_string();
        assert!(!FileKey::new("abc.pdf", b"secret-two").verify(&key));
    }

    #[test]
    fn garbage_keys_fail_closed() {
        let secret = b"0123456789abcdef";
        for bad in ["", "no-separator", "123", ";;", "notanumber;AAAA"] {
            assert!(!FileKey::new("abc.pdf", secret).verify(bad));
        }
    }

    #[test]
    fn expired_key_fails() {
        let secret = b"0123456789abcdef";
        let fk = FileKey::new("abc.pdf", secret);
        let expiry = (chrono::Utc::now() - chrono::Duration::minutes(1))
            .timestamp()
            .to_string();
        let stale = format!("{};{}", expiry, fk.code(&expiry));
        assert!(!fk.verify(&stale));
    }
}
