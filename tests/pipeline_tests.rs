//! # Pipeline Integration Tests
//!
//! End-to-end coverage of the render pipeline and the job controller:
//! z-ordered compositing, partial renders, retry policy, concurrency and
//! admission bounds, cancellation, and graceful drain.

use async_trait::async_trait;
use image::{ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use uuid::Uuid;

use tarjeta::error::TarjetaError;
use tarjeta::job::{
    CancelFlag, ControllerConfig, InMemoryQueue, JobController, JobPayload, JobState,
};
use tarjeta::pipeline::{RenderOptions, RenderPipeline};
use tarjeta::render::FontCatalog;
use tarjeta::resolve::Record;
use tarjeta::store::{
    AssetFetcher, MemoryMetadataStore, MemoryObjectStore, MetadataStore, ObjectStore,
};
use tarjeta::template::Template;

// ============================================================================
// HELPERS
// ============================================================================

fn png_bytes(width: u32, height: u32, pixel: [u8; 4]) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba(pixel)))
        .write_to(&mut cursor, ImageFormat::Png)
        .unwrap();
    cursor.into_inner()
}

fn pipeline_with(assets: Arc<dyn ObjectStore>) -> RenderPipeline {
    RenderPipeline::new(
        Arc::new(FontCatalog::empty()),
        Arc::new(AssetFetcher::new(assets)),
    )
}

fn record(value: serde_json::Value) -> Record {
    Record::from_value(value)
}

async fn render_image(
    pipeline: &RenderPipeline,
    template: &Template,
    rec: &Record,
) -> RgbaImage {
    let out = pipeline
        .render(template, rec, &RenderOptions::default(), &CancelFlag::new())
        .await
        .unwrap();
    image::load_from_memory(&out.bytes).unwrap().to_rgba8()
}

struct Harness {
    controller: Arc<JobController>,
    meta: Arc<MemoryMetadataStore>,
    output: Arc<MemoryObjectStore>,
}

async fn harness(config: ControllerConfig) -> Harness {
    let assets = Arc::new(MemoryObjectStore::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    meta.insert_template(small_template()).await;

    let output = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
    let controller = Arc::new(JobController::new(
        config,
        queue,
        meta.clone() as Arc<dyn MetadataStore>,
        output.clone(),
        pipeline_with(assets),
    ));
    controller.start().await;
    Harness {
        controller,
        meta,
        output,
    }
}

fn small_template() -> Template {
    Template::from_json(
        r#"{"id": "card", "version": 1, "width": 64, "height": 48, "elements": [
            {"type": "text", "id": "name", "field": "name", "x": 4, "y": 4,
             "font": {"size": 10}}
        ]}"#,
    )
    .unwrap()
}

fn payload(rec: serde_json::Value) -> JobPayload {
    JobPayload {
        template_id: "card".to_string(),
        template_version: 1,
        record: record(rec),
        output_format: None,
        priority: None,
    }
}

async fn await_terminal(controller: &JobController, id: Uuid) -> tarjeta::job::RenderJob {
    for _ in 0..500 {
        if let Some(job) = controller.status(id).await
            && job.state.is_terminal()
        {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job {id} did not reach a terminal state");
}

// ============================================================================
// RENDERING
// ============================================================================

#[tokio::test]
async fn composites_in_z_order_regardless_of_declaration() {
    // The red square is declared last but sits below the blue one.
    let template = Template::from_json(
        r##"{"id": "z", "version": 1, "width": 20, "height": 20,
            "brand_colors": {"red": "#ff0000", "blue": "#0000ff"},
            "elements": [
              {"type": "table", "id": "blue", "z_index": 5, "x": 0, "y": 0,
               "rows": 1, "columns": 1, "cell_width": 20, "cell_height": 20,
               "background": "$blue", "cells": []},
              {"type": "table", "id": "red", "z_index": 1, "x": 0, "y": 0,
               "rows": 1, "columns": 1, "cell_width": 20, "cell_height": 20,
               "background": "$red", "cells": []}
            ]}"##,
    )
    .unwrap();

    let pipeline = pipeline_with(Arc::new(MemoryObjectStore::new()));
    let img = render_image(&pipeline, &template, &Record::default()).await;
    assert_eq!(*img.get_pixel(10, 10), Rgba([0, 0, 255, 255]));
}

#[tokio::test]
async fn image_element_composites_from_object_store() {
    let assets = Arc::new(MemoryObjectStore::new());
    assets
        .insert("logo.png", png_bytes(10, 10, [0, 200, 0, 255]))
        .await;

    let template = Template::from_json(
        r#"{"id": "img", "version": 1, "width": 40, "height": 40, "elements": [
            {"type": "image", "id": "logo", "asset": "logo.png",
             "x": 10, "y": 10, "width": 20, "height": 20, "scale_mode": "stretch"}
        ]}"#,
    )
    .unwrap();

    let pipeline = pipeline_with(assets);
    let img = render_image(&pipeline, &template, &Record::default()).await;
    assert_eq!(*img.get_pixel(20, 20), Rgba([0, 200, 0, 255]));
    // Outside the image box the card is white.
    assert_eq!(*img.get_pixel(2, 2), Rgba([255, 255, 255, 255]));
}

#[tokio::test]
async fn qr_renders_scannable_contrast() {
    let template = Template::from_json(
        r#"{"id": "q", "version": 1, "width": 120, "height": 120, "elements": [
            {"type": "qr", "id": "code", "field": "url", "size": 100,
             "x": 10, "y": 10, "margin": 2}
        ]}"#,
    )
    .unwrap();

    let pipeline = pipeline_with(Arc::new(MemoryObjectStore::new()));
    let img = render_image(
        &pipeline,
        &template,
        &record(serde_json::json!({"url": "https://example.com/r/1"})),
    )
    .await;
    let dark = img.pixels().filter(|p| p[0] < 16).count();
    assert!(dark > 100, "expected QR modules, found {dark} dark pixels");
}

#[tokio::test]
async fn missing_field_renders_remaining_elements() {
    let template = Template::from_json(
        r##"{"id": "p", "version": 1, "width": 60, "height": 60,
            "brand_colors": {"mark": "#112233"},
            "elements": [
              {"type": "text", "id": "absent", "field": "nope", "x": 2, "y": 2},
              {"type": "table", "id": "mark", "x": 20, "y": 20,
               "rows": 1, "columns": 1, "cell_width": 10, "cell_height": 10,
               "background": "$mark", "cells": []}
            ]}"##,
    )
    .unwrap();

    let pipeline = pipeline_with(Arc::new(MemoryObjectStore::new()));
    let out = pipeline
        .render(
            &template,
            &Record::default(),
            &RenderOptions::default(),
            &CancelFlag::new(),
        )
        .await
        .unwrap();
    assert_eq!(out.warnings.len(), 1);
    assert_eq!(out.warnings[0].element, "absent");

    let img = image::load_from_memory(&out.bytes).unwrap().to_rgba8();
    assert_eq!(*img.get_pixel(25, 25), Rgba([0x11, 0x22, 0x33, 255]));
}

#[tokio::test]
async fn rendering_twice_is_pixel_identical() {
    let assets = Arc::new(MemoryObjectStore::new());
    assets
        .insert("photo.png", png_bytes(16, 8, [120, 90, 60, 255]))
        .await;

    let template = Template::from_json(
        r#"{"id": "i", "version": 1, "width": 100, "height": 80, "elements": [
            {"type": "text", "id": "t", "content": "Hola Mundo", "x": 4, "y": 4,
             "font": {"size": 12}, "rotation": 10, "opacity": 0.8},
            {"type": "image", "id": "p", "asset": "photo.png",
             "x": 30, "y": 40, "width": 40, "height": 30, "scale_mode": "fill"},
            {"type": "qr", "id": "q", "field": "url", "size": 32, "x": 60, "y": 4}
        ]}"#,
    )
    .unwrap();

    let rec = record(serde_json::json!({"url": "https://example.com"}));
    let pipeline = pipeline_with(assets);
    let a = pipeline
        .render(&template, &rec, &RenderOptions::default(), &CancelFlag::new())
        .await
        .unwrap();
    let b = pipeline
        .render(&template, &rec, &RenderOptions::default(), &CancelFlag::new())
        .await
        .unwrap();
    assert_eq!(a.bytes, b.bytes);
}

// ============================================================================
// JOB CONTROLLER
// ============================================================================

#[tokio::test]
async fn job_lifecycle_succeeds_and_persists_output() {
    let h = harness(ControllerConfig {
        rate_limit: 1000.0,
        ..Default::default()
    })
    .await;

    let id = h
        .controller
        .submit(payload(serde_json::json!({"name": "Ada"})))
        .await
        .unwrap();
    let job = await_terminal(&h.controller, id).await;

    assert_eq!(job.state, JobState::Succeeded);
    assert_eq!(job.attempts, 1);
    let url = job.output_url.unwrap();
    assert!(url.starts_with("memory://renders/card/"), "url: {url}");

    let stored = h
        .output
        .get(url.strip_prefix("memory://").unwrap())
        .await
        .unwrap();
    assert_eq!(&stored[1..4], b"PNG");

    // Status transitions were mirrored to the metadata store.
    let mirrored = h.meta.status(id).await.unwrap();
    assert_eq!(mirrored.state, JobState::Succeeded);

    h.controller.shutdown().await;
}

#[tokio::test]
async fn unknown_template_fails_terminally_after_one_attempt() {
    let h = harness(ControllerConfig::default()).await;

    let mut p = payload(serde_json::json!({}));
    p.template_id = "ghost".to_string();
    let id = h.controller.submit(p).await.unwrap();
    let job = await_terminal(&h.controller, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.last_error.unwrap().contains("not found"));

    h.controller.shutdown().await;
}

/// Output store that always fails with a transient error.
struct FailingOutputStore;

#[async_trait]
impl ObjectStore for FailingOutputStore {
    async fn get(&self, asset_ref: &str) -> Result<Vec<u8>, TarjetaError> {
        Err(TarjetaError::ResourceUnavailable(format!(
            "no object '{asset_ref}'"
        )))
    }

    async fn put(&self, _output_ref: &str, _bytes: Vec<u8>) -> Result<String, TarjetaError> {
        Err(TarjetaError::ResourceUnavailable("storage offline".to_string()))
    }
}

#[tokio::test]
async fn transient_failures_retry_to_the_attempt_ceiling() {
    let assets = Arc::new(MemoryObjectStore::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    meta.insert_template(small_template()).await;

    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
    let controller = Arc::new(JobController::new(
        ControllerConfig {
            max_attempts: 3,
            retry_backoff: Duration::from_millis(10),
            rate_limit: 1000.0,
            ..Default::default()
        },
        queue,
        meta as Arc<dyn MetadataStore>,
        Arc::new(FailingOutputStore),
        pipeline_with(assets),
    ));
    controller.start().await;

    let id = controller
        .submit(payload(serde_json::json!({"name": "x"})))
        .await
        .unwrap();
    let job = await_terminal(&controller, id).await;

    assert_eq!(job.state, JobState::Failed);
    assert_eq!(job.attempts, 3);
    assert!(job.last_error.unwrap().contains("storage offline"));

    controller.shutdown().await;
}

#[tokio::test]
async fn active_jobs_never_exceed_configured_concurrency() {
    /// Output store that tracks the maximum number of concurrent writers.
    struct ProbeStore {
        active: AtomicUsize,
        peak: AtomicUsize,
        inner: MemoryObjectStore,
    }

    #[async_trait]
    impl ObjectStore for ProbeStore {
        async fn get(&self, asset_ref: &str) -> Result<Vec<u8>, TarjetaError> {
            self.inner.get(asset_ref).await
        }

        async fn put(&self, output_ref: &str, bytes: Vec<u8>) -> Result<String, TarjetaError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(40)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.inner.put(output_ref, bytes).await
        }
    }

    let probe = Arc::new(ProbeStore {
        active: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        inner: MemoryObjectStore::new(),
    });

    let assets = Arc::new(MemoryObjectStore::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    meta.insert_template(small_template()).await;
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
    let controller = Arc::new(JobController::new(
        ControllerConfig {
            concurrency: 2,
            rate_limit: 1000.0,
            ..Default::default()
        },
        queue,
        meta as Arc<dyn MetadataStore>,
        probe.clone(),
        pipeline_with(assets),
    ));
    controller.start().await;

    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(
            controller
                .submit(payload(serde_json::json!({"name": format!("r{i}")})))
                .await
                .unwrap(),
        );
    }
    for id in ids {
        let job = await_terminal(&controller, id).await;
        assert_eq!(job.state, JobState::Succeeded);
    }

    assert!(
        probe.peak.load(Ordering::SeqCst) <= 2,
        "peak concurrency {} exceeded the configured bound",
        probe.peak.load(Ordering::SeqCst)
    );

    controller.shutdown().await;
}

#[tokio::test]
async fn admission_rate_is_bounded_by_the_token_bucket() {
    let h = harness(ControllerConfig {
        concurrency: 8,
        // Burst of 4, then 4/s: the 8th admission lands at ~1s.
        rate_limit: 4.0,
        ..Default::default()
    })
    .await;

    let start = std::time::Instant::now();
    let mut ids = Vec::new();
    for i in 0..8 {
        ids.push(
            h.controller
                .submit(payload(serde_json::json!({"name": format!("r{i}")})))
                .await
                .unwrap(),
        );
    }
    for id in ids {
        assert_eq!(await_terminal(&h.controller, id).await.state, JobState::Succeeded);
    }
    let elapsed = start.elapsed();
    assert!(
        elapsed >= Duration::from_millis(800),
        "8 admissions at 4/s finished too fast: {elapsed:?}"
    );

    h.controller.shutdown().await;
}

#[tokio::test]
async fn cancelled_before_start_never_renders() {
    // No workers yet: submit, cancel, then start. The worker must observe
    // the flag and settle the job without producing output.
    let assets = Arc::new(MemoryObjectStore::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    meta.insert_template(small_template()).await;
    let output = Arc::new(MemoryObjectStore::new());
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
    let controller = Arc::new(JobController::new(
        ControllerConfig::default(),
        queue,
        meta as Arc<dyn MetadataStore>,
        output.clone(),
        pipeline_with(assets),
    ));

    let id = controller
        .submit(payload(serde_json::json!({"name": "late"})))
        .await
        .unwrap();
    assert!(controller.cancel(id).await);

    controller.start().await;
    let job = await_terminal(&controller, id).await;
    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.output_url.is_none());

    // Cancelling a terminal job is a no-op.
    assert!(!controller.cancel(id).await);

    controller.shutdown().await;
}

#[tokio::test]
async fn shutdown_drains_active_jobs() {
    /// Output store slow enough that shutdown overlaps an active job.
    struct SlowStore(MemoryObjectStore);

    #[async_trait]
    impl ObjectStore for SlowStore {
        async fn get(&self, asset_ref: &str) -> Result<Vec<u8>, TarjetaError> {
            self.0.get(asset_ref).await
        }

        async fn put(&self, output_ref: &str, bytes: Vec<u8>) -> Result<String, TarjetaError> {
            tokio::time::sleep(Duration::from_millis(150)).await;
            self.0.put(output_ref, bytes).await
        }
    }

    let assets = Arc::new(MemoryObjectStore::new());
    let meta = Arc::new(MemoryMetadataStore::new());
    meta.insert_template(small_template()).await;
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
    let controller = Arc::new(JobController::new(
        ControllerConfig {
            rate_limit: 1000.0,
            ..Default::default()
        },
        queue,
        meta as Arc<dyn MetadataStore>,
        Arc::new(SlowStore(MemoryObjectStore::new())),
        pipeline_with(assets),
    ));
    controller.start().await;

    let id = controller
        .submit(payload(serde_json::json!({"name": "drain"})))
        .await
        .unwrap();

    // Let a worker claim the job, then shut down mid-flight.
    tokio::time::sleep(Duration::from_millis(50)).await;
    controller.shutdown().await;

    let job = controller.status(id).await.unwrap();
    assert_eq!(
        job.state,
        JobState::Succeeded,
        "active job must finish during drain, got {:?}",
        job.state
    );

    // Admission is closed after shutdown.
    assert!(
        controller
            .submit(payload(serde_json::json!({"name": "late"})))
            .await
            .is_err()
    );
}
