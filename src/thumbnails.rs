//! Profile-picture variants.
//!
//! When the app uploads a profile picture to
//! `profile_pictures/<user>/<name>.<ext>`, this handler writes three
//! downsized JPEG copies next to it: `<name>_thumb.jpg`, `<name>_medium.jpg`
//! and `<name>_large.jpg`. Those uploads land in the same bucket and fire
//! the same trigger again, so anything already carrying one of our suffixes
//! is skipped before we touch the network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, RgbImage};
use lambda_runtime::{tracing, Error};
use serde_json::{json, Value};

use crate::streams::S3Event;

pub const PROFILE_PICTURE_PREFIX: &str = "profile_pictures/";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn content_type(&self, bucket: &str, key: &str) -> Result<Option<String>>;

    async fn fetch(&self, bucket: &str, key: &str) -> Result<Vec<u8>>;

    /// Write a new publicly readable object.
    async fn publish(&self, bucket: &str, key: &str, data: Vec<u8>, content_type: &str)
        -> Result<()>;
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Variant {
    Thumb,
    Medium,
    Large,
}

impl Variant {
    pub const ALL: [Variant; 3] = [Variant::Thumb, Variant::Medium, Variant::Large];

    pub fn suffix(&self) -> &'static str {
        match self {
            Variant::Thumb => "_thumb",
            Variant::Medium => "_medium",
            Variant::Large => "_large",
        }
    }

    /// The box that the output must fit within.
    pub fn bounds(&self) -> (u32, u32) {
        match self {
            Variant::Thumb => (150, 150),
            Variant::Medium => (400, 400),
            Variant::Large => (800, 800),
        }
    }

    pub fn quality(&self) -> u8 {
        match self {
            Variant::Thumb => 80,
            Variant::Medium => 85,
            Variant::Large => 90,
        }
    }
}

/// Split a key into its directory (with trailing slash, possibly empty) and
/// its file name with the extension removed.
fn split_key(key: &str) -> (&str, &str) {
    let split = key.rfind('/').map(|i| i + 1).unwrap_or(0);
    let (dir, file) = key.split_at(split);
    let base = file.rsplit_once('.').map(|(b, _)| b).unwrap_or(file);
    (dir, base)
}

/// Whether an uploaded key is a profile picture that we haven't generated
/// ourselves.
pub fn is_original_profile_picture(key: &str) -> bool {
    if !key.starts_with(PROFILE_PICTURE_PREFIX) {
        return false;
    }

    let (_, base) = split_key(key);
    !Variant::ALL.iter().any(|v| base.ends_with(v.suffix()))
}

pub fn variant_key(key: &str, variant: Variant) -> String {
    let (dir, base) = split_key(key);
    format!("{}{}{}.jpg", dir, base, variant.suffix())
}

/// Shrink to fit within the variant's bounds, preserving aspect ratio.
/// Images that already fit are left at their original size.
pub fn resize_for(img: &DynamicImage, variant: Variant) -> RgbImage {
    let (max_w, max_h) = variant.bounds();

    if img.width() <= max_w && img.height() <= max_h {
        img.to_rgb8()
    } else {
        img.resize(max_w, max_h, FilterType::Lanczos3).to_rgb8()
    }
}

/// Encode as a progressive JPEG with optimized Huffman tables.
pub fn encode_jpeg(img: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let width = u16::try_from(img.width()).context("image too wide for JPEG")?;
    let height = u16::try_from(img.height()).context("image too tall for JPEG")?;

    let mut out = Vec::new();
    let mut encoder = jpeg_encoder::Encoder::new(&mut out, quality);
    encoder.set_progressive(true);
    encoder.set_optimized_huffman_tables(true);
    encoder.encode(img.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)?;
    Ok(out)
}

/// Decode an upload and render every variant. The image is normalized to
/// 8-bit RGB first, which drops any alpha channel.
pub fn render_variants(data: &[u8]) -> Result<Vec<(Variant, Vec<u8>)>> {
    let img = image::load_from_memory(data).context("could not decode image")?;
    let img = DynamicImage::ImageRgb8(img.to_rgb8());

    Variant::ALL
        .iter()
        .map(|&v| Ok((v, encode_jpeg(&resize_for(&img, v), v.quality())?)))
        .collect()
}

/// Handle an S3 event. Never fails the event.
pub async fn handler(payload: Option<Value>, store: &dyn ObjectStore) -> Result<Value, Error> {
    let event: S3Event = match payload.map(serde_json::from_value).transpose() {
        Ok(e) => e.unwrap_or_default(),
        Err(e) => {
            tracing::error!("undecodable S3 event: {e}");
            return Ok(json!({ "error": e.to_string() }));
        }
    };

    let mut created = 0;

    for record in &event.records {
        if !record.event_name.is_empty() && !record.event_name.starts_with("ObjectCreated") {
            continue;
        }

        let bucket = &record.s3.bucket.name;

        let key = match record.object_key() {
            Ok(k) => k,
            Err(e) => {
                tracing::error!("{e:#}");
                continue;
            }
        };

        match process_object(store, bucket, &key).await {
            Ok(keys) => created += keys.len(),
            Err(e) => tracing::error!("error generating variants of {bucket}/{key}: {e:#}"),
        }
    }

    Ok(json!({ "created": created }))
}

/// Generate and upload the variants of one object, returning the keys
/// written. Objects that don't qualify produce an empty list.
pub async fn process_object(store: &dyn ObjectStore, bucket: &str, key: &str) -> Result<Vec<String>> {
    if !is_original_profile_picture(key) {
        return Ok(Vec::new());
    }

    let content_type = store.content_type(bucket, key).await?;

    if !content_type
        .as_deref()
        .is_some_and(|ct| ct.starts_with("image/"))
    {
        tracing::info!("skipping {key}: content type {content_type:?} is not an image");
        return Ok(Vec::new());
    }

    let data = store.fetch(bucket, key).await?;
    let mut written = Vec::with_capacity(Variant::ALL.len());

    for (variant, jpeg) in render_variants(&data)? {
        let out_key = variant_key(key, variant);
        let n_bytes = jpeg.len();
        store.publish(bucket, &out_key, jpeg, "image/jpeg").await?;
        tracing::info!("wrote {out_key} ({n_bytes} bytes)");
        written.push(out_key);
    }

    Ok(written)
}
