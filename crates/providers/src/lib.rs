//! 压缩 Provider 模块
//!
//! 每个 Provider 封装一个第三方图片压缩/转换服务，实现统一的
//! [`CompressionProvider`] 能力集。新增 Provider 只需实现该 trait 并在
//! [`build_providers`] 中登记，编排器无需改动。

mod cloudinary;
mod http;
mod registry;
mod tinify;
mod traits;

#[cfg(test)]
mod test_support;

pub use cloudinary::{build_transformation, sign_params, CloudinaryProvider};
pub use registry::build_providers;
pub use tinify::TinifyProvider;
pub use traits::{CompressionProvider, SharedProvider};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
