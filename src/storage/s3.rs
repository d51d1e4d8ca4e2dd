use aws_config::meta::region::RegionProviderChain;
use aws_credential_types::Credentials;
use aws_types::region::Region;
use aws_sdk_s3::{Client, primitives::ByteStream};
use bytes::Bytes;
use tracing::info;
use async_trait::async_trait;
use crate::{config::Config, storage::{validate_name, Namespace, Storage, StorageError}};

// AWS S3 Storage backend
#[derive(Clone)]
pub struct S3Storage{
    client: Client,  // AWS S3 client
    bucket: String,  // S3 bucket name
}

impl S3Storage {
    /// Initialize S3 client and ensure the bucket exists
    pub async fn new(config: &Config) -> Self {
        let region_provider = RegionProviderChain::first_try(Region::new(config.s3_region.clone()))
            .or_default_provider()
            .or_else(Region::new("us-east-1"));

        let mut aws_config_builder = aws_config::from_env().region(region_provider);

        // Custom endpoint (e.g., for MinIO)
        if let Some(endpoint) = &config.s3_endpoint {
            aws_config_builder = aws_config_builder.endpoint_url(endpoint);

            let credentials = Credentials::new(
            config.s3_access_key.clone(),
            config.s3_secret_key.clone(),
            None,
            None,
            "custom"
            );

            aws_config_builder = aws_config_builder.credentials_provider(credentials);
        }

        let aws_config = aws_config_builder.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)// Required for MinIO
                .build()
        );

        // Ensure bucket exists
        Self::ensure_bucket_exists(&client, &config.s3_bucket).await;

        Self {
            client,
            bucket: config.s3_bucket.clone(),
        }
    }

    /// Ensure the S3 bucket exists, or create it if possible
    async fn ensure_bucket_exists(client: &Client, bucket: &str) {
    // First try to create it directly
    match client.create_bucket().bucket(bucket).send().await {
        Ok(_) => {
            tracing::info!("Bucket {} created successfully", bucket);
        }
        Err(e) => {
            let err_msg = e.to_string();
            if err_msg.contains("BucketAlreadyOwnedByYou") ||
               err_msg.contains("BucketAlreadyExists") ||
               err_msg.contains("YourPreviousRequestToCreateTheBucket") {
                tracing::info!("Bucket {} already exists", bucket);
            } else {
                // For MinIO, we might get other errors
                tracing::warn!("Could not create bucket {}: {}", bucket, err_msg);
                // Verify if the bucket exists anyway
                match client.head_bucket().bucket(bucket).send().await {
                    Ok(_) => tracing::info!("Bucket {} exists (verified)", bucket),
                    Err(check_err) => tracing::error!("Bucket {} does not exist and cannot be created: {}", bucket, check_err),
                }
            }
        }
    }
}

    fn object_key(namespace: Namespace, name: &str) -> Result<String, StorageError> {
        validate_name(name)?;
        Ok(namespace.key(name))
    }
}

#[async_trait]
impl Storage for S3Storage {

    async fn write(&self, namespace: Namespace, name: &str, content: Bytes) -> Result<(), StorageError>{
        let key = Self::object_key(namespace, name)?;
        let body = ByteStream::from(content);

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(body)
            .send()
            .await
            .map_err(|e| StorageError::UploadError(e.to_string()))?;

        tracing::debug!("S3 PUT key = {}", key);
        Ok(())
    }

    async fn read(&self, namespace: Namespace, name: &str) -> Result<Bytes, StorageError> {
        let key = Self::object_key(namespace, name)?;
        tracing::debug!("S3 GET key = {}", key);
        let response = self.client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("S3 GET failed for {}: {}", key, e);
                StorageError::NotFound(key.clone())
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::IoError(std::io::Error::other(e.to_string())))?;

        Ok(data.into_bytes())
    }

    async fn exists(&self, namespace: Namespace, name: &str) -> Result<bool, StorageError> {
        let key = Self::object_key(namespace, name)?;

        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) => {
                let not_found = e
                    .as_service_error()
                    .map(|service_err| service_err.is_not_found())
                    .unwrap_or(false);
                if not_found {
                    Ok(false)
                } else {
                    Err(StorageError::IoError(std::io::Error::other(e.to_string())))
                }
            }
        }
    }

    async fn delete(&self, namespace: Namespace, name: &str) -> Result<(), StorageError> {
        let key = Self::object_key(namespace, name)?;

        // S3 reports success for missing keys, which matches the trait contract
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::DeleteError(e.to_string()))?;

        info!("Blob deleted from s3: {}", key);
        Ok(())
    }

    async fn list(&self, namespace: Namespace) -> Result<Vec<String>, StorageError> {
        let prefix = format!("{}/", namespace.prefix());
        let mut names = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let response = self.client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.take())
                .send()
                .await
                .map_err(|e| StorageError::ListError(e.to_string()))?;

            for object in response.contents() {
                if let Some(name) = object.key().and_then(|k| k.strip_prefix(&prefix)) {
                    if !name.is_empty() && !name.contains('/') {
                        names.push(name.to_string());
                    }
                }
            }

            match response.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }

        names.sort();
        Ok(names)
    }

}
