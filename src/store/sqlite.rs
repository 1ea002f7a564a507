//! src/store/sqlite.rs
//!
//! SqliteObjectStore: flat object store backed by SQLite for metadata and
//! local disk for payloads. Payload files are named by a fresh UUID on every
//! write and sharded beneath `base_path/{bucket}/{uuid[0..2]}/{uuid[2..4]}/`,
//! so keys (including folder markers ending in `/`) never turn into disk
//! paths and a failed overwrite never touches the previous payload.

use super::{
    ByteStream, DeleteFailure, ListObjectsParams, ListObjectsResult, ObjectInfo, ObjectStore,
    StoreError, StoreResult, assemble_page, validate_bucket_name, validate_object_key,
};
use crate::models::{bucket::Bucket, object::Object};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");
const MAX_LIST_KEYS: usize = 1000;
const OBJECT_COLUMNS: &str =
    "id, bucket_id, key, size_bytes, etag, payload, last_modified, is_deleted";

/// Object store keeping durable metadata in SQLite and payloads on disk.
///
/// Deletes are soft in the metadata table; the payload file is removed
/// immediately.
#[derive(Clone)]
pub struct SqliteObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl SqliteObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Statements are idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = MIGRATION_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        debug!("running {} migration statements", statements.len());
        for stmt in statements {
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    fn payload_path(&self, bucket_name: &str, payload: &str) -> PathBuf {
        let mut path = self.bucket_root(bucket_name);
        path.push(payload.get(0..2).unwrap_or("00"));
        path.push(payload.get(2..4).unwrap_or("00"));
        path.push(payload);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        validate_bucket_name(bucket)?;
        sqlx::query_as::<Sqlite, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::NoSuchBucket(bucket.to_string()),
                other => StoreError::Sqlx(other),
            })
    }

    /// Fetch a non-deleted object row, mapping a missing row to `NoSuchKey`.
    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Object> {
        sqlx::query_as::<_, Object>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects
             WHERE key = ? AND bucket_id = ? AND is_deleted = 0"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NoSuchKey {
                bucket: bucket.name.clone(),
                key: key.to_string(),
            },
            other => StoreError::Sqlx(other),
        })
    }

    /// The live row for `key`, if any.
    async fn find_object(&self, bucket: &Bucket, key: &str) -> StoreResult<Option<Object>> {
        match self.fetch_object(bucket, key).await {
            Ok(obj) => Ok(Some(obj)),
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Insert or overwrite the metadata row for `key` (S3 overwrite semantics).
    async fn upsert_object(
        &self,
        bucket: &Bucket,
        key: &str,
        size_bytes: i64,
        etag: &str,
        payload: &str,
    ) -> StoreResult<Object> {
        let row = sqlx::query_as::<_, Object>(&format!(
            r#"
            INSERT INTO objects (
                id, bucket_id, key, size_bytes, etag, payload, last_modified, is_deleted
            ) VALUES (?, ?, ?, ?, ?, ?, ?, 0)
            ON CONFLICT(bucket_id, key) DO UPDATE SET
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                payload = excluded.payload,
                last_modified = excluded.last_modified,
                is_deleted = 0
            RETURNING {OBJECT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(bucket.id)
        .bind(key)
        .bind(size_bytes)
        .bind(etag)
        .bind(payload)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        Ok(row)
    }

    /// Pick a fresh payload name and make sure its shard directory exists.
    async fn new_payload(&self, bucket_name: &str) -> StoreResult<(String, PathBuf)> {
        let payload = Uuid::new_v4().simple().to_string();
        let path = self.payload_path(bucket_name, &payload);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok((payload, path))
    }

    /// Stream a body into `path`, returning its size and MD5.
    async fn write_payload(path: &Path, mut body: ByteStream) -> io::Result<(i64, String)> {
        let mut file = File::create(path).await?;
        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok((size_bytes, format!("{:x}", digest.compute())))
    }

    /// Point `key` at the freshly written `payload`, then drop whatever payload
    /// the key had before. If the row cannot be written the new file goes and
    /// the old row and payload stay as they were.
    async fn commit_payload(
        &self,
        bucket: &Bucket,
        key: &str,
        size_bytes: i64,
        etag: &str,
        payload: &str,
    ) -> StoreResult<Object> {
        let previous = match self.find_object(bucket, key).await {
            Ok(previous) => previous,
            Err(err) => {
                self.discard_payload(&bucket.name, payload).await;
                return Err(err);
            }
        };

        match self.upsert_object(bucket, key, size_bytes, etag, payload).await {
            Ok(row) => {
                if let Some(old) = previous.filter(|old| old.payload != payload) {
                    self.discard_payload(&bucket.name, &old.payload).await;
                }
                Ok(row)
            }
            Err(err) => {
                self.discard_payload(&bucket.name, payload).await;
                Err(err)
            }
        }
    }

    /// Best-effort removal of a payload file no row refers to.
    async fn discard_payload(&self, bucket_name: &str, payload: &str) {
        if let Err(err) = self.remove_payload(bucket_name, payload).await {
            debug!(payload, error = %err, "failed to discard payload");
        }
    }

    async fn remove_payload(&self, bucket_name: &str, payload: &str) -> io::Result<()> {
        let file_path = self.payload_path(bucket_name, payload);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(err),
        }

        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.bucket_root(bucket_name))
                .await;
        }
        Ok(())
    }

    async fn remove_one(&self, bucket: &Bucket, key: &str) -> StoreResult<()> {
        validate_object_key(key)?;
        let Some(obj) = self.find_object(bucket, key).await? else {
            return Ok(());
        };
        sqlx::query("UPDATE objects SET is_deleted = 1 WHERE id = ?")
            .bind(obj.id)
            .execute(&*self.db)
            .await?;
        self.remove_payload(&bucket.name, &obj.payload).await?;
        Ok(())
    }

    /// Recursively remove empty shard directories up to the bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for SqliteObjectStore {
    async fn ensure_bucket(&self, name: &str) -> StoreResult<()> {
        validate_bucket_name(name)?;
        fs::create_dir_all(self.bucket_root(name)).await?;

        match self.fetch_bucket(name).await {
            Ok(_) => return Ok(()),
            Err(StoreError::NoSuchBucket(_)) => {}
            Err(err) => return Err(err),
        }

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(Utc::now())
            .execute(&*self.db)
            .await
        {
            Ok(_) => {
                debug!(bucket = name, "created bucket");
                Ok(())
            }
            // lost a creation race; the bucket exists either way
            Err(err) if is_unique_violation(&err) => Ok(()),
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    async fn stat(&self, bucket: &str, key: &str) -> StoreResult<ObjectInfo> {
        validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        Ok(self.fetch_object(&bucket_rec, key).await?.into())
    }

    async fn list_page(
        &self,
        bucket: &str,
        params: &ListObjectsParams,
    ) -> StoreResult<ListObjectsResult> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let max_keys = params.max_keys.clamp(1, MAX_LIST_KEYS);

        let mut builder = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE bucket_id = "
        ));
        builder.push_bind(bucket_rec.id);
        builder.push(" AND is_deleted = 0");

        // exact, case-sensitive prefix match; LIKE would treat `_`/`%` as
        // wildcards and fold ASCII case
        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND instr(key, ");
            builder.push_bind(prefix.to_string());
            builder.push(") = 1");
        }

        if let Some(token) = params
            .continuation_token
            .as_ref()
            .or(params.start_after.as_ref())
        {
            builder.push(" AND key > ");
            builder.push_bind(token.clone());
        }

        builder.push(" ORDER BY key ASC LIMIT ");
        builder.push_bind((max_keys + 1) as i64);

        let rows: Vec<Object> = builder.build_query_as().fetch_all(&*self.db).await?;
        let rows = rows.into_iter().map(ObjectInfo::from).collect();
        Ok(assemble_page(rows, params, max_keys))
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        length: u64,
    ) -> StoreResult<ObjectInfo> {
        validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let (payload, file_path) = self.new_payload(&bucket_rec.name).await?;

        let (size_bytes, etag) = match Self::write_payload(&file_path, body).await {
            Ok(written) => written,
            Err(err) => {
                self.discard_payload(&bucket_rec.name, &payload).await;
                return Err(StoreError::Io(err));
            }
        };
        if size_bytes as u64 != length {
            self.discard_payload(&bucket_rec.name, &payload).await;
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::InvalidData,
                format!(
                    "object `{}` declared {} bytes but body had {}",
                    key, length, size_bytes
                ),
            )));
        }

        let row = self
            .commit_payload(&bucket_rec, key, size_bytes, &etag, &payload)
            .await?;
        Ok(row.into())
    }

    async fn get(&self, bucket: &str, key: &str) -> StoreResult<ByteStream> {
        validate_object_key(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let obj = self.fetch_object(&bucket_rec, key).await?;

        let file_path = self.payload_path(&bucket_rec.name, &obj.payload);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                }
            } else {
                StoreError::Io(err)
            }
        })?;

        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn copy(&self, bucket: &str, src_key: &str, dst_key: &str) -> StoreResult<ObjectInfo> {
        validate_object_key(src_key)?;
        validate_object_key(dst_key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let source = self.fetch_object(&bucket_rec, src_key).await?;

        let src_path = self.payload_path(&bucket_rec.name, &source.payload);
        let (payload, dst_path) = self.new_payload(&bucket_rec.name).await?;
        if let Err(err) = fs::copy(&src_path, &dst_path).await {
            self.discard_payload(&bucket_rec.name, &payload).await;
            return Err(if err.kind() == ErrorKind::NotFound {
                StoreError::NoSuchKey {
                    bucket: bucket.to_string(),
                    key: src_key.to_string(),
                }
            } else {
                StoreError::Io(err)
            });
        }

        let etag = source.etag.clone().unwrap_or_default();
        let copied = self
            .commit_payload(&bucket_rec, dst_key, source.size_bytes, &etag, &payload)
            .await?;
        Ok(copied.into())
    }

    async fn remove_many(
        &self,
        bucket: &str,
        keys: Vec<String>,
    ) -> StoreResult<Vec<DeleteFailure>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let mut failures = Vec::new();
        for key in keys {
            if let Err(err) = self.remove_one(&bucket_rec, &key).await {
                failures.push(DeleteFailure {
                    key,
                    reason: err.to_string(),
                });
            }
        }
        Ok(failures)
    }
}

/// Return true if SQLx error indicates a unique constraint violation.
fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::bytes_body;
    use futures::TryStreamExt;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    const BUCKET: &str = "user-files";

    async fn setup_store() -> (TempDir, SqliteObjectStore) {
        let temp_dir = TempDir::new().unwrap();
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let store = SqliteObjectStore::new(Arc::new(pool), temp_dir.path());
        store.migrate().await.unwrap();
        store.ensure_bucket(BUCKET).await.unwrap();
        (temp_dir, store)
    }

    async fn read_all(store: &SqliteObjectStore, key: &str) -> Vec<u8> {
        let chunks: Vec<_> = store
            .get(BUCKET, key)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn put_then_get_returns_same_bytes() {
        let (_dir, store) = setup_store().await;
        let info = store
            .put(BUCKET, "1-alice/a.txt", bytes_body("hello"), 5)
            .await
            .unwrap();
        assert_eq!(info.size, 5);
        assert_eq!(info.etag.as_deref(), Some("5d41402abc4b2a76b9719d911017c592"));
        assert_eq!(read_all(&store, "1-alice/a.txt").await, b"hello");
    }

    #[tokio::test]
    async fn markers_are_regular_zero_byte_objects() {
        let (_dir, store) = setup_store().await;
        store
            .put(BUCKET, "1-alice/docs/", crate::store::empty_body(), 0)
            .await
            .unwrap();
        let info = store.stat(BUCKET, "1-alice/docs/").await.unwrap();
        assert_eq!(info.size, 0);
    }

    #[tokio::test]
    async fn length_mismatch_is_rejected() {
        let (_dir, store) = setup_store().await;
        let err = store
            .put(BUCKET, "1-alice/a.txt", bytes_body("hello"), 3)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.stat(BUCKET, "1-alice/a.txt").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn stat_of_missing_key_is_not_found() {
        let (_dir, store) = setup_store().await;
        let err = store.stat(BUCKET, "1-alice/nope").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn unknown_bucket_is_not_a_missing_key() {
        let (_dir, store) = setup_store().await;
        let err = store.stat("other-bucket", "k").await.unwrap_err();
        assert!(matches!(err, StoreError::NoSuchBucket(_)));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn prefix_listing_is_literal_and_case_sensitive() {
        let (_dir, store) = setup_store().await;
        for key in ["1-a_b/x", "1-aXb/y", "1-A_B/z"] {
            store.put(BUCKET, key, bytes_body("1"), 1).await.unwrap();
        }
        let params = ListObjectsParams {
            prefix: Some("1-a_b/".into()),
            max_keys: 100,
            ..Default::default()
        };
        let page = store.list_page(BUCKET, &params).await.unwrap();
        let keys: Vec<_> = page.objects.iter().map(|o| o.key.as_str()).collect();
        assert_eq!(keys, vec!["1-a_b/x"]);
    }

    #[tokio::test]
    async fn listing_pages_through_all_keys() {
        let (_dir, store) = setup_store().await;
        for key in ["p/a", "p/b", "p/c"] {
            store.put(BUCKET, key, bytes_body("1"), 1).await.unwrap();
        }
        let mut params = ListObjectsParams {
            prefix: Some("p/".into()),
            max_keys: 2,
            ..Default::default()
        };
        let first = store.list_page(BUCKET, &params).await.unwrap();
        assert!(first.is_truncated);
        params.continuation_token = first.next_continuation_token;
        let second = store.list_page(BUCKET, &params).await.unwrap();
        assert!(!second.is_truncated);
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "p/c");
    }

    #[tokio::test]
    async fn copy_duplicates_payload_and_metadata() {
        let (_dir, store) = setup_store().await;
        store
            .put(BUCKET, "u/old/a.txt", bytes_body("data"), 4)
            .await
            .unwrap();
        let copied = store.copy(BUCKET, "u/old/a.txt", "u/new/a.txt").await.unwrap();
        assert_eq!(copied.size, 4);
        assert_eq!(read_all(&store, "u/new/a.txt").await, b"data");
        assert_eq!(read_all(&store, "u/old/a.txt").await, b"data");
    }

    #[tokio::test]
    async fn removed_objects_disappear_and_can_be_rewritten() {
        let (_dir, store) = setup_store().await;
        store.put(BUCKET, "u/a", bytes_body("1"), 1).await.unwrap();
        let failures = store
            .remove_many(BUCKET, vec!["u/a".into(), "u/missing".into()])
            .await
            .unwrap();
        assert!(failures.is_empty());
        assert!(store.stat(BUCKET, "u/a").await.unwrap_err().is_not_found());

        store.put(BUCKET, "u/a", bytes_body("22"), 2).await.unwrap();
        assert_eq!(store.stat(BUCKET, "u/a").await.unwrap().size, 2);
    }

    fn payload_files(dir: &Path) -> usize {
        let mut count = 0;
        let mut pending = vec![dir.to_path_buf()];
        while let Some(dir) = pending.pop() {
            for entry in std::fs::read_dir(&dir).unwrap() {
                let path = entry.unwrap().path();
                if path.is_dir() {
                    pending.push(path);
                } else {
                    count += 1;
                }
            }
        }
        count
    }

    #[tokio::test]
    async fn overwrite_keeps_one_payload_per_key() {
        let (dir, store) = setup_store().await;
        store.put(BUCKET, "u/a", bytes_body("one"), 3).await.unwrap();
        store.put(BUCKET, "u/a", bytes_body("two!"), 4).await.unwrap();
        store.copy(BUCKET, "u/a", "u/b").await.unwrap();
        store.copy(BUCKET, "u/a", "u/b").await.unwrap();

        assert_eq!(read_all(&store, "u/a").await, b"two!");
        assert_eq!(payload_files(dir.path()), 2);

        store
            .remove_many(BUCKET, vec!["u/a".into(), "u/b".into()])
            .await
            .unwrap();
        assert_eq!(payload_files(dir.path()), 0);
    }

    #[tokio::test]
    async fn failed_overwrite_keeps_previous_payload() {
        let (dir, store) = setup_store().await;
        store.put(BUCKET, "u/a", bytes_body("keep"), 4).await.unwrap();

        sqlx::query(
            "CREATE TRIGGER objects_frozen BEFORE UPDATE ON objects
             BEGIN SELECT RAISE(ABORT, 'objects are frozen'); END",
        )
        .execute(&*store.db)
        .await
        .unwrap();

        let err = store
            .put(BUCKET, "u/a", bytes_body("lost"), 4)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Sqlx(_)));
        assert_eq!(read_all(&store, "u/a").await, b"keep");
        assert_eq!(store.stat(BUCKET, "u/a").await.unwrap().size, 4);
        assert_eq!(payload_files(dir.path()), 1);
    }
}
