//! CUDA C source for the syncbn kernels, compiled at runtime with NVRTC.
//!
//! Every kernel takes `(N, C, S)` as `int`; callers guarantee
//! `N * C * S <= INT_MAX`. Block sizes always come from the warp-multiple
//! ladder, so the full-mask shuffles see every lane of each warp.

/// Kernel entry points, in the order the host launches them.
pub const STATS_KERNEL: &str = "syncbn_sum_sqsum_f32";
pub const FORWARD_KERNEL: &str = "syncbn_forward_f32";
pub const BACKWARD_REDUCE_KERNEL: &str = "syncbn_backward_xhat_f32";
pub const BACKWARD_KERNEL: &str = "syncbn_backward_f32";

pub const SYNCBN_KERNEL_SRC: &str = r#"
#define WARP_SIZE 32
#define FULL_MASK 0xffffffffu

struct Float2 {
    float v1;
    float v2;
};

__device__ __forceinline__ Float2 make_pair(float a, float b) {
    Float2 r;
    r.v1 = a;
    r.v2 = b;
    return r;
}

__device__ __forceinline__ float warp_sum(float v) {
    for (int offset = WARP_SIZE / 2; offset > 0; offset /= 2) {
        v += __shfl_xor_sync(FULL_MASK, v, offset, WARP_SIZE);
    }
    return v;
}

__device__ __forceinline__ Float2 warp_sum(Float2 v) {
    v.v1 = warp_sum(v.v1);
    v.v2 = warp_sum(v.v2);
    return v;
}

// Result valid in thread 0.
__device__ Float2 block_sum(Float2 val) {
    __shared__ Float2 shared[WARP_SIZE];
    const int lane = threadIdx.x % WARP_SIZE;
    const int wid = threadIdx.x / WARP_SIZE;

    val = warp_sum(val);
    if (lane == 0) {
        shared[wid] = val;
    }
    __syncthreads();

    const int num_warps = (blockDim.x + WARP_SIZE - 1) / WARP_SIZE;
    val = (threadIdx.x < num_warps) ? shared[lane] : make_pair(0.0f, 0.0f);
    if (wid == 0) {
        val = warp_sum(val);
    }
    return val;
}

__device__ __forceinline__ int channel_offset(int c, int i, int C, int S) {
    const int n = i / S;
    const int s = i - n * S;
    return (n * C + c) * S + s;
}

extern "C" __global__ void syncbn_sum_sqsum_f32(
    const float* __restrict__ x,
    float* __restrict__ sum,
    float* __restrict__ sqsum,
    int N, int C, int S)
{
    const int c = blockIdx.x;
    const int m = N * S;

    Float2 acc = make_pair(0.0f, 0.0f);
    for (int i = threadIdx.x; i < m; i += blockDim.x) {
        const float v = x[channel_offset(c, i, C, S)];
        acc.v1 += v;
        acc.v2 += v * v;
    }
    acc = block_sum(acc);

    if (threadIdx.x == 0) {
        sum[c] = acc.v1;
        sqsum[c] = acc.v2;
    }
}

extern "C" __global__ void syncbn_forward_f32(
    const float* __restrict__ x,
    const float* __restrict__ gamma,
    const float* __restrict__ beta,
    const float* __restrict__ mean,
    const float* __restrict__ var,
    float eps,
    float* __restrict__ z,
    int N, int C, int S)
{
    const int total = N * C * S;
    const int idx = blockIdx.x * blockDim.x + threadIdx.x;
    if (idx >= total) {
        return;
    }
    const int c = (idx / S) % C;
    z[idx] = gamma[c] * (x[idx] - mean[c]) / sqrtf(var[c] + eps) + beta[c];
}

extern "C" __global__ void syncbn_backward_xhat_f32(
    const float* __restrict__ dz,
    const float* __restrict__ x,
    const float* __restrict__ mean,
    const float* __restrict__ var,
    float eps,
    float* __restrict__ sum_dz,
    float* __restrict__ sum_dz_xhat,
    int N, int C, int S)
{
    const int c = blockIdx.x;
    const int m = N * S;
    const float mu = mean[c];
    const float invstd = 1.0f / sqrtf(var[c] + eps);

    Float2 acc = make_pair(0.0f, 0.0f);
    for (int i = threadIdx.x; i < m; i += blockDim.x) {
        const int off = channel_offset(c, i, C, S);
        const float g = dz[off];
        acc.v1 += g;
        acc.v2 += g * (x[off] - mu) * invstd;
    }
    acc = block_sum(acc);

    if (threadIdx.x == 0) {
        sum_dz[c] = acc.v1;
        sum_dz_xhat[c] = acc.v2;
    }
}

extern "C" __global__ void syncbn_backward_f32(
    const float* __restrict__ dz,
    const float* __restrict__ x,
    const float* __restrict__ gamma,
    const float* __restrict__ mean,
    const float* __restrict__ var,
    const float* __restrict__ sum_dz,
    const float* __restrict__ sum_dz_xhat,
    float eps,
    float* __restrict__ dx,
    float* __restrict__ dweight,
    float* __restrict__ dbias,
    int N, int C, int S)
{
    const int c = blockIdx.x;
    const int m = N * S;

    if (threadIdx.x == 0) {
        dweight[c] = sum_dz_xhat[c];
        dbias[c] = sum_dz[c];
    }
    if (m == 0) {
        return;
    }

    const float invstd = 1.0f / sqrtf(var[c] + eps);
    const float scale = gamma[c] * invstd;
    const float inv_m = 1.0f / (float)m;
    const float mean_dz = sum_dz[c] * inv_m;
    const float mean_dz_xhat = sum_dz_xhat[c] * inv_m;
    const float mu = mean[c];

    for (int i = threadIdx.x; i < m; i += blockDim.x) {
        const int off = channel_offset(c, i, C, S);
        const float xhat = (x[off] - mu) * invstd;
        dx[off] = scale * (dz[off] - mean_dz - xhat * mean_dz_xhat);
    }
}
"#;
