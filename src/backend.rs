//! Backend and device of a run, picked by the `dev-*` features.
//!
//! Training runs on [`MainAutoBackend`] and inference on [`MainBackend`], both on
//! [`MainDevice::main_device`]. Image batches are converted to the backend's own
//! elements by [`ImageBatcher`](crate::data::ImageBatcher), so `dev-f16` needs no
//! change in the data pipeline.

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

/// Float element of weights and activations.
#[cfg(feature = "dev-f16")]
pub type Element = burn::tensor::f16;
#[cfg(not(feature = "dev-f16"))]
pub type Element = f32;

/// Integer element of class targets and top-k indices.
pub type IntElement = i32;

#[cfg(feature = "dev-ndarray")]
pub type MainBackend = burn::backend::NdArray<Element, IntElement>;
#[cfg(any(feature = "dev-tch-cpu", feature = "dev-tch-gpu"))]
pub type MainBackend = burn::backend::libtorch::LibTorch<Element, IntElement>;
#[cfg(feature = "dev-wgpu")]
pub type MainBackend = burn::backend::wgpu::Wgpu<Element, IntElement>;
#[cfg(feature = "dev-cuda")]
pub type MainBackend = burn::backend::Cuda<Element, IntElement>;

pub type MainAutoBackend = burn::backend::Autodiff<MainBackend>;

/// The single device a run trains or infers on.
pub trait MainDevice: Backend {
    fn main_device() -> Self::Device {
        Default::default()
    }
}

#[cfg(all(feature = "_dev-has-backend", not(feature = "dev-tch-gpu")))]
impl MainDevice for MainBackend {}

// libtorch defaults to the cpu
#[cfg(feature = "dev-tch-gpu")]
impl MainDevice for MainBackend {
    fn main_device() -> Self::Device {
        if cfg!(target_os = "macos") {
            burn::backend::libtorch::LibTorchDevice::Mps
        } else {
            burn::backend::libtorch::LibTorchDevice::Cuda(0)
        }
    }
}

impl MainDevice for MainAutoBackend {
    fn main_device() -> Self::Device {
        <<Self as AutodiffBackend>::InnerBackend as MainDevice>::main_device()
    }
}

/// Backend and device, for the logs.
///
/// e.g. `Autodiff<NdArray<f32, i32>> on Cpu`
pub fn describe<B: MainDevice>() -> String {
    format!("{} on {:?}", short_type_name::<B>(), B::main_device())
}

/// Type name without module paths.
fn short_type_name<T>() -> String {
    let name = std::any::type_name::<T>();
    let mut short = String::with_capacity(name.len());
    for segment in name.split_inclusive(['<', '>', ',', ' ']) {
        short.push_str(segment.rsplit("::").next().unwrap_or(segment));
    }
    short
}

#[cfg(not(feature = "_dev-has-backend"))]
mod err {
    use super::*;
    std::compile_error!("no backend selected: enable one of the `dev-*` features");

    // still define the backend so that the compile error stands alone
    pub type MainBackend = burn::backend::NdArray<Element, IntElement>;
    impl MainDevice for MainBackend {}
}
#[cfg(not(feature = "_dev-has-backend"))]
pub use err::*;

#[cfg(all(test, feature = "dev-ndarray"))]
mod tests {
    use super::*;

    #[test]
    fn description_names_the_backend_without_paths() {
        let description = describe::<MainAutoBackend>();
        assert!(description.starts_with("Autodiff<NdArray<"), "{description}");
        assert!(!description.contains("::"), "{description}");
        assert!(description.ends_with("on Cpu"), "{description}");
    }
}
