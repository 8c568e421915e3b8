//! Offline batch pipeline: read webdataset-style parquet shards (url,
//! caption, key + arbitrary metadata columns), submit each sample's image
//! through the same `WorkerHandle` the HTTP ingress uses, and write the
//! resulting embeddings back out as parquet.

use crate::store::ShardLocation;
use arrow::array::{Array, ArrayRef, Float32Array, ListArray, RecordBatch, StringArray};
use arrow::buffer::OffsetBuffer;
use arrow::datatypes::{DataType, Field, Schema};
use bytes::Bytes;
use embedserve_common::error::{EmbedServeError, Result};
use embedserve_common::metrics::MetricsRegistry;
use embedserve_core::request::Payload;
use embedserve_core::worker::WorkerHandle;
use futures::future::BoxFuture;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::async_writer::AsyncFileWriter;
use parquet::arrow::AsyncArrowWriter;
use parquet::errors::{ParquetError, Result as ParquetResult};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{info, warn};

pub struct PipelineSummary {
    pub shards_processed: usize,
    pub samples_processed: usize,
    pub samples_failed: usize,
}

/// Run the offline pipeline end to end: list shards under `input`, process
/// every sample through `worker`, write one output shard per input shard
/// under `output`.
pub async fn run(
    input: &str,
    output: &str,
    worker: WorkerHandle,
    metrics: Arc<MetricsRegistry>,
) -> Result<PipelineSummary> {
    let input_location = ShardLocation::parse(input);
    let output_location = ShardLocation::parse(output);
    let input_op = input_location.build_operator()?;
    let output_op = output_location.build_operator()?;

    let shards = list_parquet_shards(&input_op, input_location.prefix()).await?;
    info!(count = shards.len(), "found parquet shards");

    let mut shards_processed = 0;
    let mut samples_processed = 0;
    let mut samples_failed = 0;

    for shard_path in &shards {
        let bytes = input_op
            .read(shard_path)
            .await
            .map_err(|e| EmbedServeError::Io(std::io::Error::other(e.to_string())))?
            .to_bytes();

        let samples = read_shard(bytes)?;
        info!(shard = %shard_path, samples = samples.len(), "processing shard");

        let mut keys = Vec::with_capacity(samples.len());
        let mut urls = Vec::with_capacity(samples.len());
        let mut captions = Vec::with_capacity(samples.len());
        let mut embeddings: Vec<Option<Vec<f32>>> = Vec::with_capacity(samples.len());
        let mut errors: Vec<Option<String>> = Vec::with_capacity(samples.len());

        for sample in &samples {
            match process_sample(sample, &input_op, &worker).await {
                Ok(embedding) => {
                    embeddings.push(Some(embedding));
                    errors.push(None);
                    samples_processed += 1;
                }
                Err(e) => {
                    warn!(key = %sample.key, error = %e, "sample failed");
                    metrics.record_error("batch-pipeline", e.error_type());
                    embeddings.push(None);
                    errors.push(Some(e.to_string()));
                    samples_failed += 1;
                }
            }
            keys.push(sample.key.clone());
            urls.push(sample.url.clone());
            captions.push(sample.caption.clone());
        }

        let batch = build_output_batch(&keys, &urls, &captions, &embeddings, &errors)?;
        let shard_name = shard_output_name(shard_path);
        write_parquet(&output_op, &shard_name, &batch).await?;
        shards_processed += 1;
    }

    Ok(PipelineSummary {
        shards_processed,
        samples_processed,
        samples_failed,
    })
}

struct Sample {
    url: String,
    caption: String,
    key: String,
    metadata: Map<String, Value>,
}

async fn list_parquet_shards(op: &opendal::Operator, prefix: &str) -> Result<Vec<String>> {
    let entries = op
        .list(prefix)
        .await
        .map_err(|e| EmbedServeError::Io(std::io::Error::other(e.to_string())))?;

    let mut shards: Vec<String> = entries
        .into_iter()
        .map(|entry| entry.path().to_string())
        .filter(|path| path.ends_with(".parquet"))
        .collect();
    shards.sort();
    Ok(shards)
}

fn read_shard(bytes: Bytes) -> Result<Vec<Sample>> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| EmbedServeError::processing(format!("failed to open shard: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| EmbedServeError::processing(format!("failed to build shard reader: {e}")))?;

    let mut samples = Vec::new();
    for batch_result in reader {
        let batch = batch_result.map_err(|e| EmbedServeError::processing(format!("failed to read row group: {e}")))?;
        samples.extend(extract_samples(&batch)?);
    }
    Ok(samples)
}

fn extract_samples(batch: &RecordBatch) -> Result<Vec<Sample>> {
    let schema = batch.schema();
    let string_col = |name: &str| -> Option<&StringArray> {
        schema
            .index_of(name)
            .ok()
            .and_then(|idx| batch.column(idx).as_any().downcast_ref::<StringArray>())
    };

    let urls = string_col("url");
    let captions = string_col("caption");
    let keys = string_col("key");

    let known = ["url", "caption", "key"];
    let mut samples = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mut metadata = Map::new();
        for field in schema.fields() {
            if known.contains(&field.name().as_str()) {
                continue;
            }
            if let Some(col) = string_col(field.name()) {
                metadata.insert(field.name().clone(), Value::String(col.value(row).to_string()));
            }
        }
        samples.push(Sample {
            url: urls.map(|a| a.value(row).to_string()).unwrap_or_default(),
            caption: captions.map(|a| a.value(row).to_string()).unwrap_or_default(),
            key: keys.map(|a| a.value(row).to_string()).unwrap_or_default(),
            metadata,
        });
    }
    Ok(samples)
}

async fn process_sample(sample: &Sample, op: &opendal::Operator, worker: &WorkerHandle) -> Result<Vec<f32>> {
    let image_bytes = load_image_bytes(&sample.url, op).await?;
    let image = image::load_from_memory(&image_bytes)
        .map_err(|e| EmbedServeError::invalid_image(format!("invalid image at {}: {e}", sample.url)))?;

    let payload = Payload {
        image: image::DynamicImage::ImageRgb8(image.to_rgb8()),
        text: if sample.caption.is_empty() {
            None
        } else {
            Some(sample.caption.clone())
        },
    };
    let metadata = Value::Object(sample.metadata.clone());
    let response = worker.submit(payload, metadata).await?;
    Ok(response.output)
}

async fn load_image_bytes(url: &str, shard_op: &opendal::Operator) -> Result<Vec<u8>> {
    if url.starts_with("s3://") || !url.contains("://") {
        let location = if url.starts_with("s3://") {
            ShardLocation::parse(url)
        } else {
            // Same backend as the shard store; read relative to its root.
            return shard_op
                .read(url)
                .await
                .map(|b| b.to_vec())
                .map_err(|e| EmbedServeError::Io(std::io::Error::other(e.to_string())));
        };
        let op = location.build_operator()?;
        let path = location.prefix();
        op.read(path)
            .await
            .map(|b| b.to_vec())
            .map_err(|e| EmbedServeError::Io(std::io::Error::other(e.to_string())))
    } else {
        Err(EmbedServeError::invalid_request(format!(
            "unsupported image url scheme: {url}"
        )))
    }
}

fn build_output_batch(
    keys: &[String],
    urls: &[String],
    captions: &[String],
    embeddings: &[Option<Vec<f32>>],
    errors: &[Option<String>],
) -> Result<RecordBatch> {
    let dim = embeddings
        .iter()
        .find_map(|e| e.as_ref().map(|v| v.len()))
        .unwrap_or(0);

    let key_array = StringArray::from(keys.to_vec());
    let url_array = StringArray::from(urls.to_vec());
    let caption_array = StringArray::from(captions.to_vec());
    let error_array = StringArray::from(
        errors.iter().map(|e| e.as_deref()).collect::<Vec<Option<&str>>>(),
    );

    let mut flat = Vec::with_capacity(embeddings.len() * dim);
    let mut offsets = Vec::with_capacity(embeddings.len() + 1);
    offsets.push(0_i32);
    for embedding in embeddings {
        match embedding {
            Some(values) => flat.extend_from_slice(values),
            None => flat.extend(std::iter::repeat(f32::NAN).take(dim)),
        }
        offsets.push(flat.len() as i32);
    }

    let values = Float32Array::from(flat);
    let embedding_field = Arc::new(Field::new("item", DataType::Float32, false));
    let embedding_array = ListArray::new(
        embedding_field.clone(),
        OffsetBuffer::new(offsets.into()),
        Arc::new(values) as ArrayRef,
        None,
    );

    let schema = Arc::new(Schema::new(vec![
        Field::new("key", DataType::Utf8, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("caption", DataType::Utf8, false),
        Field::new("embedding", DataType::List(embedding_field), true),
        Field::new("error", DataType::Utf8, true),
    ]));

    RecordBatch::try_new(
        schema,
        vec![
            Arc::new(key_array),
            Arc::new(url_array),
            Arc::new(caption_array),
            Arc::new(embedding_array),
            Arc::new(error_array),
        ],
    )
    .map_err(|e| EmbedServeError::internal(format!("failed to build output batch: {e}")))
}

struct OpendalAsyncWriter(opendal::Writer);

impl AsyncFileWriter for OpendalAsyncWriter {
    fn write(&mut self, bs: Bytes) -> BoxFuture<'_, ParquetResult<()>> {
        Box::pin(async move {
            self.0
                .write(bs)
                .await
                .map_err(|e| ParquetError::External(Box::new(e)))?;
            Ok(())
        })
    }

    fn complete(&mut self) -> BoxFuture<'_, ParquetResult<()>> {
        Box::pin(async move {
            self.0.close().await.map_err(|e| ParquetError::External(Box::new(e)))?;
            Ok(())
        })
    }
}

async fn write_parquet(op: &opendal::Operator, path: &str, batch: &RecordBatch) -> Result<()> {
    let writer = op
        .writer(path)
        .await
        .map_err(|e| EmbedServeError::Io(std::io::Error::other(e.to_string())))?;
    let async_writer = OpendalAsyncWriter(writer);

    let mut parquet_writer = AsyncArrowWriter::try_new(async_writer, batch.schema(), None)
        .map_err(|e| EmbedServeError::internal(format!("failed to open parquet writer: {e}")))?;
    parquet_writer
        .write(batch)
        .await
        .map_err(|e| EmbedServeError::internal(format!("failed to write batch: {e}")))?;
    parquet_writer
        .close()
        .await
        .map_err(|e| EmbedServeError::internal(format!("failed to close parquet writer: {e}")))?;
    Ok(())
}

fn shard_output_name(shard_path: &str) -> String {
    let stem = shard_path.rsplit('/').next().unwrap_or(shard_path);
    format!("{}.embeddings.parquet", stem.trim_end_matches(".parquet"))
}
