use std::thread;

use image::DynamicImage;
use ort::{
    execution_providers::CPUExecutionProvider,
    session::{
        Session,
        builder::{GraphOptimizationLevel, SessionBuilder},
    },
};
use snafu::ResultExt;
use tracing::*;

use crate::error::{OrtInitSnafu, SpectraiError};

pub trait Model {
    type Input;
    type Output;
    type Config;

    const MODEL_NAME: &'static str;

    fn load(&self) -> &[u8];
    fn config(&self) -> &Self::Config;
    fn input_name(&self) -> &str;
    fn output_name(&self) -> &str;
}

pub trait OnnxSession<M: Model> {
    type Output;
    type Extra;

    fn preprocess(&self, image: &DynamicImage) -> Result<M::Input, SpectraiError>;

    fn postprocess(
        &self,
        output: M::Output,
        extra: Self::Extra,
    ) -> Result<Self::Output, SpectraiError>;

    fn infer(&mut self, input: M::Input) -> Result<M::Output, SpectraiError>;

    fn run(
        &mut self,
        image: &DynamicImage,
        extra: Self::Extra,
    ) -> Result<Self::Output, SpectraiError> {
        let input = self.preprocess(image)?;

        let output = self.infer(input)?;

        self.postprocess(output, extra)
    }
}

/// Upper bound on intra-op threads. A single image never benefits from more.
const MAX_INTRA_THREADS: usize = 4;

/// Session builder shared by every detector.
///
/// CPU is always registered last, so a missing GPU provider falls back to it.
pub fn session_builder() -> Result<SessionBuilder, SpectraiError> {
    let threads = thread::available_parallelism()
        .map(|n| n.get().min(MAX_INTRA_THREADS))
        .unwrap_or(1);

    let mut providers = Vec::new();
    #[cfg(all(feature = "coreml", target_os = "macos"))]
    {
        use ort::execution_providers::CoreMLExecutionProvider;
        use ort::execution_providers::coreml::CoreMLModelFormat;
        providers.push(
            CoreMLExecutionProvider::default()
                .with_model_format(CoreMLModelFormat::MLProgram)
                .build(),
        );
    }
    #[cfg(feature = "cuda")]
    {
        use ort::execution_providers::CUDAExecutionProvider;
        providers.push(CUDAExecutionProvider::default().build());
    }
    providers.push(CPUExecutionProvider::default().build());

    debug!(
        "Building detector session with {} providers and {} threads",
        providers.len(),
        threads
    );

    Session::builder()
        .context(OrtInitSnafu { stage: "builder" })?
        .with_execution_providers(providers)
        .context(OrtInitSnafu { stage: "provider" })?
        .with_optimization_level(GraphOptimizationLevel::Level1)
        .context(OrtInitSnafu {
            stage: "optimization",
        })?
        .with_intra_threads(threads)
        .context(OrtInitSnafu {
            stage: "intra-threads",
        })
}
