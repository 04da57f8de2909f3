use aws_sdk_s3::Client;
use aws_sdk_s3::error::ProvideErrorMetadata;
use aws_smithy_types::byte_stream::ByteStream;

use crate::error::{StorageError, format_err_chain};
use crate::store::{Blob, BlobStore, BoxFuture, ObjectMeta};

/// S3-backed [`BlobStore`] scoped to one bucket.
///
/// The object ETag is used as the generation token. Conditional create
/// relies on `If-None-Match: *`, conditional delete on `If-Match`.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

/// S3 reports 412 for a failed `If-Match`/`If-None-Match` and 409 when a
/// concurrent conditional write to the same key is in flight.
fn is_precondition_failure(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("PreconditionFailed") | Some("ConditionalRequestConflict")
    )
}

/// ETags are quoted; single-part uploads carry the content MD5.
fn normalize_etag(etag: &str) -> String {
    etag.trim_matches('"').to_string()
}

fn md5_from_etag(etag: &str) -> Option<String> {
    let etag = normalize_etag(etag);
    (etag.len() == 32 && etag.chars().all(|c| c.is_ascii_hexdigit())).then_some(etag)
}

/// Get an object from S3.
pub async fn get_object(client: &Client, bucket: &str, key: &str) -> Result<Blob, StorageError> {
    let resp = client
        .get_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| {
            let err = e.into_service_error();
            if err.is_no_such_key() {
                StorageError::NotFound {
                    key: key.to_string(),
                }
            } else {
                StorageError::GetObject(err.to_string())
            }
        })?;

    let generation = resp.e_tag().map(normalize_etag).unwrap_or_default();
    let body = resp
        .body
        .collect()
        .await
        .map_err(|e| StorageError::GetObject(format_err_chain(&e)))?
        .into_bytes()
        .to_vec();

    Ok(Blob { body, generation })
}

/// Put an object to S3. Returns the new ETag.
pub async fn put_object(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
) -> Result<String, StorageError> {
    let resp = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .send()
        .await
        .map_err(|e| StorageError::PutObject(format_err_chain(&e)))?;

    Ok(resp.e_tag().map(normalize_etag).unwrap_or_default())
}

/// Put an object only if the key is free (`If-None-Match: *`).
/// Returns the new ETag, or `StorageError::PreconditionFailed` if an object
/// already exists.
pub async fn put_object_if_absent(
    client: &Client,
    bucket: &str,
    key: &str,
    body: Vec<u8>,
) -> Result<String, StorageError> {
    let resp = client
        .put_object()
        .bucket(bucket)
        .key(key)
        .body(ByteStream::from(body))
        .if_none_match("*")
        .send()
        .await
        .map_err(|e| {
            let err = e.into_service_error();
            if is_precondition_failure(err.code()) {
                StorageError::PreconditionFailed {
                    key: key.to_string(),
                }
            } else {
                StorageError::PutObject(err.to_string())
            }
        })?;

    Ok(resp.e_tag().map(normalize_etag).unwrap_or_default())
}

/// Delete an object from S3.
pub async fn delete_object(client: &Client, bucket: &str, key: &str) -> Result<(), StorageError> {
    client
        .delete_object()
        .bucket(bucket)
        .key(key)
        .send()
        .await
        .map_err(|e| StorageError::DeleteObject(format_err_chain(&e)))?;

    Ok(())
}

/// Delete an object only if its ETag still matches.
pub async fn delete_object_if_match(
    client: &Client,
    bucket: &str,
    key: &str,
    expected_etag: &str,
) -> Result<(), StorageError> {
    client
        .delete_object()
        .bucket(bucket)
        .key(key)
        .if_match(format!("\"{}\"", normalize_etag(expected_etag)))
        .send()
        .await
        .map_err(|e| {
            let err = e.into_service_error();
            match err.code() {
                Some("NoSuchKey") | Some("NotFound") => StorageError::NotFound {
                    key: key.to_string(),
                },
                code if is_precondition_failure(code) => StorageError::PreconditionFailed {
                    key: key.to_string(),
                },
                _ => StorageError::DeleteObject(err.to_string()),
            }
        })?;

    Ok(())
}

/// List objects under a prefix with size and ETag metadata.
pub async fn list_objects_with_metadata(
    client: &Client,
    bucket: &str,
    prefix: &str,
) -> Result<Vec<ObjectMeta>, StorageError> {
    let mut objects = Vec::new();
    let mut continuation_token: Option<String> = None;

    loop {
        let mut req = client.list_objects_v2().bucket(bucket).prefix(prefix);

        if let Some(token) = &continuation_token {
            req = req.continuation_token(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| StorageError::ListObjects(format_err_chain(&e)))?;

        for obj in resp.contents() {
            if let Some(key) = obj.key() {
                let etag = obj.e_tag().unwrap_or_default();
                objects.push(ObjectMeta {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    generation: normalize_etag(etag),
                    md5: md5_from_etag(etag),
                });
            }
        }

        if resp.is_truncated() == Some(true) {
            continuation_token = resp.next_continuation_token().map(|s| s.to_string());
        } else {
            break;
        }
    }

    objects.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(objects)
}

impl BlobStore for S3Store {
    fn get<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Blob, StorageError>> {
        Box::pin(get_object(&self.client, &self.bucket, key))
    }

    fn put<'a>(&'a self, key: &'a str, body: Vec<u8>) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(put_object(&self.client, &self.bucket, key, body))
    }

    fn delete<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(delete_object(&self.client, &self.bucket, key))
    }

    fn conditional_create<'a>(
        &'a self,
        key: &'a str,
        body: Vec<u8>,
    ) -> BoxFuture<'a, Result<String, StorageError>> {
        Box::pin(put_object_if_absent(&self.client, &self.bucket, key, body))
    }

    fn conditional_delete<'a>(
        &'a self,
        key: &'a str,
        generation: &'a str,
    ) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(delete_object_if_match(
            &self.client,
            &self.bucket,
            key,
            generation,
        ))
    }

    fn list<'a>(&'a self, prefix: &'a str) -> BoxFuture<'a, Result<Vec<ObjectMeta>, StorageError>> {
        Box::pin(list_objects_with_metadata(&self.client, &self.bucket, prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn etag_quotes_are_stripped() {
        assert_eq!(normalize_etag("\"abc\""), "abc");
        assert_eq!(normalize_etag("abc"), "abc");
    }

    #[test]
    fn multipart_etag_has_no_md5() {
        assert_eq!(
            md5_from_etag("\"900150983cd24fb0d6963f7d28e17f72\"").as_deref(),
            Some("900150983cd24fb0d6963f7d28e17f72")
        );
        assert_eq!(md5_from_etag("\"900150983cd24fb0d6963f7d28e17f72-3\""), None);
    }
}
