// ============================================================
// Layer 1 - Backend Dispatch
// ============================================================
// Picks the concrete Burn backend named by the config and hands
// the run to the application layer.
//
//   device = "gpu"  ->  Autodiff<Wgpu>,    DiscreteGpu(gpu_idx)
//   device = "cpu"  ->  Autodiff<NdArray>, Cpu
//
// Everything below this point is generic over the backend.

use anyhow::Result;
use burn::backend::{
    ndarray::NdArrayDevice,
    wgpu::WgpuDevice,
    Autodiff, NdArray, Wgpu,
};

use crate::application::runner;
use crate::domain::config::{DeviceKind, RunConfig};

type GpuBackend = Autodiff<Wgpu>;
type CpuBackend = Autodiff<NdArray>;

pub fn dispatch(config: RunConfig) -> Result<()> {
    match config.device {
        DeviceKind::Gpu => {
            let device = WgpuDevice::DiscreteGpu(config.gpu_idx);
            tracing::info!("Using WGPU device: {:?}", device);
            runner::run::<GpuBackend>(config, device)
        }
        DeviceKind::Cpu => {
            tracing::info!("Using NdArray CPU backend");
            runner::run::<CpuBackend>(config, NdArrayDevice::Cpu)
        }
    }
}
