//! Frame Orchestrator - 多后端帧编排库
//!
//! 在一个与图形 API 无关的 `GraphicsBackend` 接口之上实现显式图形 API 的帧循环：
//! 获取交换链图像 → 录制命令 → 提交 → 呈现 → 等待 fence，
//! 以及经由暂存缓冲区的 GPU 资源上传。
//!
//! # 模块结构
//!
//! - `core`: 日志、配置和错误处理
//! - `gfx`: 图形后端（Vulkan、DirectX 12、无窗口模拟后端）
//! - `renderer`: 帧编排器、资源上传和渲染器生命周期
//! - `geometry`: 程序化生成的演示内容（UV 球体、棋盘格纹理）
//!
//! # 使用示例
//!
//! ```no_run
//! use frame_orchestrator::core::Config;
//! use frame_orchestrator::gfx::{HeadlessBackend, HeadlessOptions};
//! use frame_orchestrator::renderer::Renderer;
//!
//! let config = Config::default();
//! let backend = HeadlessBackend::new(HeadlessOptions::default())?;
//! let mut renderer = Renderer::new(backend, &config)?;
//!
//! // 每一帧清除获取到的交换链图像并呈现
//! let fence = renderer.render_frame()?;
//! println!("frame submitted with fence {}", fence.value());
//!
//! # Ok::<(), frame_orchestrator::core::RenderError>(())
//! ```

pub mod core;
pub mod geometry;
pub mod gfx;
pub mod renderer;
