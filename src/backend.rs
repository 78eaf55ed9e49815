//! Compute backend selection
//!
//! The pipeline runs on NdArray (CPU) by default; building with `--features cuda`
//! switches every stage to the CUDA backend.

use burn::backend::Autodiff;
use burn::tensor::backend::Backend;

#[cfg(feature = "cuda")]
pub type DefaultBackend = burn_cuda::Cuda;

#[cfg(all(not(feature = "cuda"), any(feature = "ndarray", feature = "cpu")))]
pub type DefaultBackend = burn_ndarray::NdArray;

#[cfg(all(not(feature = "cuda"), not(feature = "ndarray"), not(feature = "cpu")))]
compile_error!("At least one backend (cuda, ndarray, or cpu) must be enabled!");

/// Backend used by the fit loop (gradients tracked)
pub type TrainingBackend = Autodiff<DefaultBackend>;

/// Device handle shared by training and evaluation
pub type PipelineDevice = <DefaultBackend as Backend>::Device;

/// Device every stage runs on
pub fn pipeline_device() -> PipelineDevice {
    PipelineDevice::default()
}

#[cfg(feature = "cuda")]
pub const BACKEND_NAME: &str = "CUDA (GPU)";

#[cfg(not(feature = "cuda"))]
pub const BACKEND_NAME: &str = "NdArray (CPU)";
