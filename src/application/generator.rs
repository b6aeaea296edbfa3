//! Engine-agnostic entry point used by the HTTP layer and the CLI.

use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    application::{
        error::error_chain,
        render::{Cluster, ClusterError, RenderRequest},
    },
    domain::options::{GenerationOptions, Orientation, PdfOptions},
};

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("failed to generate pdf")]
    Internal(#[source] ClusterError),
}

/// Translates caller options into render options and runs the job on the cluster.
#[derive(Clone)]
pub struct PdfGenerator {
    cluster: Cluster,
    defaults: PdfOptions,
}

impl PdfGenerator {
    pub fn new(cluster: Cluster) -> Self {
        Self::with_defaults(cluster, PdfOptions::default())
    }

    pub fn with_defaults(cluster: Cluster, defaults: PdfOptions) -> Self {
        Self { cluster, defaults }
    }

    pub fn cluster(&self) -> &Cluster {
        &self.cluster
    }

    /// Overlays the supplied keys onto the default render options.
    ///
    /// An explicit width or height always clears the paper format.
    pub fn pdf_options(&self, options: &GenerationOptions) -> PdfOptions {
        let mut pdf = self.defaults.clone();

        if let Some(format) = options.format {
            pdf.format = Some(format);
        }
        if let Some(orientation) = options.orientation {
            pdf.landscape = orientation == Orientation::Landscape;
        }
        if let Some(border) = options.border {
            pdf.margin.top = border.top.or(pdf.margin.top);
            pdf.margin.right = border.right.or(pdf.margin.right);
            pdf.margin.bottom = border.bottom.or(pdf.margin.bottom);
            pdf.margin.left = border.left.or(pdf.margin.left);
        }
        if options.width.is_some() || options.height.is_some() {
            pdf.format = None;
            pdf.width = options.width.or(pdf.width);
            pdf.height = options.height.or(pdf.height);
        }

        pdf
    }

    pub async fn generate_from_template(
        &self,
        html: impl Into<String>,
        options: GenerationOptions,
    ) -> Result<Bytes, GenerateError> {
        let started_at = Instant::now();
        let mut request = RenderRequest::new(html, self.pdf_options(&options));
        if let Some(timeout_ms) = options.timeout {
            request = request.with_timeout(Duration::from_millis(timeout_ms));
        }

        let pending = self.cluster.execute(request);
        let job_id = pending.job_id();

        match pending.await {
            Ok(pdf) => {
                debug!(
                    target = "pressroom::generator",
                    op = "generator::generate_from_template",
                    result = "ok",
                    job_id = %job_id,
                    pdf_bytes = pdf.len(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "PDF generated"
                );
                Ok(pdf)
            }
            Err(err) => {
                error!(
                    target = "pressroom::generator",
                    op = "generator::generate_from_template",
                    result = "error",
                    job_id = %job_id,
                    error_kind = err.kind(),
                    error = %err,
                    chain = ?error_chain(&err),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    "PDF generation failed"
                );
                Err(GenerateError::Internal(err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        application::render::{ClusterOptions, FontInliner, WorkerError, testing::FakeEngine},
        domain::options::{BorderOptions, CssLength, PaperFormat},
    };

    fn generator(engine: &FakeEngine) -> PdfGenerator {
        let fonts = FontInliner::new(Duration::from_secs(5)).expect("font client");
        let options = ClusterOptions {
            max_workers: 1,
            max_concurrent_jobs: 1,
            ..ClusterOptions::default()
        };
        PdfGenerator::new(Cluster::new(options, engine.launcher(), fonts))
    }

    fn length(raw: &str) -> CssLength {
        raw.parse().expect("length")
    }

    #[test]
    fn empty_options_yield_defaults() {
        let generator = generator(&FakeEngine::new());
        assert_eq!(
            generator.pdf_options(&GenerationOptions::default()),
            PdfOptions::default()
        );
    }

    #[test]
    fn width_clears_format() {
        let generator = generator(&FakeEngine::new());
        let options = GenerationOptions {
            format: Some(PaperFormat::Letter),
            width: Some(length("400px")),
            ..GenerationOptions::default()
        };

        let pdf = generator.pdf_options(&options);
        assert_eq!(pdf.format, None);
        assert_eq!(pdf.width, Some(length("400px")));
        assert_eq!(pdf.height, None);
    }

    #[test]
    fn partial_border_and_orientation_overlay_defaults() {
        let generator = generator(&FakeEngine::new());
        let options = GenerationOptions {
            orientation: Some(Orientation::Landscape),
            border: Some(BorderOptions {
                top: Some(length("1in")),
                ..BorderOptions::default()
            }),
            format: Some(PaperFormat::A5),
            ..GenerationOptions::default()
        };

        let pdf = generator.pdf_options(&options);
        assert!(pdf.landscape);
        assert_eq!(pdf.format, Some(PaperFormat::A5));
        assert_eq!(pdf.margin.top, Some(length("1in")));
        assert_eq!(pdf.margin.left, Some(CssLength::mm(10.0)));
        assert!(pdf.print_background);
    }

    #[tokio::test(start_paused = true)]
    async fn generates_through_cluster() {
        let engine = FakeEngine::new();
        let generator = generator(&engine);
        generator.cluster().init().await.expect("init");

        let pdf = generator
            .generate_from_template("<p>hello</p>", GenerationOptions::default())
            .await
            .expect("generated");
        assert!(pdf.starts_with(b"%PDF"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_option_becomes_job_override() {
        let engine = FakeEngine::new();
        let generator = generator(&engine);
        generator.cluster().init().await.expect("init");

        let options = GenerationOptions {
            timeout: Some(250),
            ..GenerationOptions::default()
        };
        let err = generator
            .generate_from_template("SLOW", options)
            .await
            .expect_err("timed out");

        let GenerateError::Internal(ClusterError::Job(WorkerError::Timeout { after, .. })) = err
        else {
            panic!("unexpected error: {err:?}");
        };
        assert_eq!(after, Duration::from_millis(250));
    }
}
