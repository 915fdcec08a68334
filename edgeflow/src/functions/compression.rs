//! Gzip/zlib compression with base64 output.

use super::AppFunction;
use crate::context::FunctionContext;
use crate::core::{FunctionOutput, PipelineData};
use crate::errors::FunctionError;
use crate::messaging::CONTENT_TYPE_TEXT;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io::Write;

/// Compression algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompressionAlgorithm {
    /// Gzip container.
    Gzip,
    /// Zlib container.
    Zlib,
}

impl CompressionAlgorithm {
    fn compress(self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self {
            Self::Gzip => {
                let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
            Self::Zlib => {
                let mut encoder = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

/// Compresses the incoming data and forwards it base64-encoded.
///
/// Sets the response content type to `text/plain`.
#[derive(Debug, Clone)]
pub struct Compression {
    algorithm: CompressionAlgorithm,
}

impl Compression {
    /// Creates a compression function.
    #[must_use]
    pub const fn new(algorithm: CompressionAlgorithm) -> Self {
        Self { algorithm }
    }
}

#[async_trait]
impl AppFunction for Compression {
    fn name(&self) -> &str {
        match self.algorithm {
            CompressionAlgorithm::Gzip => "CompressWithGZIP",
            CompressionAlgorithm::Zlib => "CompressWithZLIB",
        }
    }

    async fn apply(&self, ctx: &mut FunctionContext, data: Option<PipelineData>) -> FunctionOutput {
        let Some(data) = data else {
            return FunctionOutput::fail(FunctionError::no_data(self.name(), ctx.pipeline_id()));
        };

        let compressed = data
            .to_bytes()
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.algorithm.compress(&bytes).map_err(|e| e.to_string()));

        match compressed {
            Ok(compressed) => {
                ctx.set_response_content_type(CONTENT_TYPE_TEXT);
                FunctionOutput::proceed(STANDARD.encode(compressed).into_bytes())
            }
            Err(e) => FunctionOutput::fail(FunctionError::server_error(format!(
                "function {} in pipeline '{}' failed to compress data: {e}",
                self.name(),
                ctx.pipeline_id()
            ))),
        }
    }
}
