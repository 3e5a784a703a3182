//! S3 access for the profile-picture handler.

use anyhow::Result;
use async_trait::async_trait;
use aws_sdk_s3::{primitives::ByteStream, types::ObjectCannedAcl};

use crate::thumbnails::ObjectStore;

pub struct S3Objects {
    client: aws_sdk_s3::Client,
}

impl S3Objects {
    pub fn new(client: aws_sdk_s3::Client) -> Self {
        S3Objects { client }
    }
}

#[async_trait]
impl ObjectStore for S3Objects {
    async fn content_type(&self, bucket: &str, key: &str) -> Result<Option<String>> {
        let result = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        Ok(result.content_type)
    }

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let result = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await?;

        let data = result.body.collect().await?;
        Ok(data.into_bytes().to_vec())
    }

    async fn publish(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .acl(ObjectCannedAcl::PublicRead)
            .body(ByteStream::from(data))
            .send()
            .await?;
        Ok(())
    }
}
