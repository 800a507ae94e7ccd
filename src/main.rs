//! Frame Orchestrator - 多后端帧循环演示程序
//!
//! 从 `config.toml`（可选）读取设置，按配置选择 Vulkan、DirectX 12 或无窗口后端，
//! 上传程序化生成的球体和棋盘格纹理，然后进入帧循环：
//! 获取图像 → 清屏 → 提交 → 呈现。
//!
//! # 使用方法
//!
//! ```bash
//! # 使用配置文件（不存在时使用默认配置：Vulkan，1200x900）
//! cargo run
//! ```
//!
//! # 事件处理
//!
//! - `CloseRequested` / Escape：等待 GPU 空闲后退出
//! - `Resized`：按新尺寸重建交换链，最小化（尺寸为 0）时暂停渲染
//! - 表面失效（`SurfaceLost` / `PresentLost`）：重建交换链后继续
//!
//! 其余错误记录失败的操作和状态码，进程以状态码 1 退出。

use std::process::ExitCode;

use anyhow::Context;
use tracing::{debug, error, info, warn};
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event, KeyEvent, WindowEvent};
use winit::event_loop::{EventLoop, EventLoopWindowTarget};
use winit::keyboard::{Key, NamedKey};
use winit::window::{Window, WindowBuilder};

use frame_orchestrator::core::{log, Config, GraphicsBackendKind, GraphicsError, RenderError};
use frame_orchestrator::geometry::{checkerboard, uv_sphere};
use frame_orchestrator::gfx::{create_backend, GraphicsBackend};
use frame_orchestrator::renderer::resource::{BufferDescriptor, BufferUsageType, ResourceState};
use frame_orchestrator::renderer::Renderer;

type DynRenderer = Renderer<Box<dyn GraphicsBackend>>;

fn main() -> ExitCode {
    // 在初始化日志之前加载配置
    let config = Config::from_file_or_default("config.toml");
    log::init_from_config(&config.logging);
    info!(version = env!("CARGO_PKG_VERSION"), "Frame Orchestrator starting...");

    match run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: Config) -> anyhow::Result<()> {
    config.validate().context("Invalid configuration")?;
    info!(
        backend = config.graphics.backend.name(),
        width = config.window.width,
        height = config.window.height,
        buffering = config.graphics.buffering_count,
        vsync = config.graphics.vsync,
        "Graphics configuration"
    );

    match config.graphics.backend {
        GraphicsBackendKind::Headless => run_headless(&config),
        _ => run_windowed(&config),
    }
}

/// 上传演示内容：球体的顶点和索引缓冲区，以及带完整 mip 链的棋盘格纹理
fn upload_demo_content(renderer: &mut DynRenderer) -> anyhow::Result<()> {
    let sphere = uv_sphere(1.0, 32, 16);
    sphere.validate().context("Generated sphere is invalid")?;

    let vertex_desc = BufferDescriptor::device_local(sphere.vertex_bytes().len() as u64, BufferUsageType::Vertex)
        .with_name("Sphere Vertices");
    renderer
        .create_buffer_init(&vertex_desc, sphere.vertex_bytes(), ResourceState::VertexBuffer)
        .context("Failed to upload sphere vertices")?;

    let index_desc = BufferDescriptor::device_local(sphere.index_bytes().len() as u64, BufferUsageType::Index)
        .with_name("Sphere Indices");
    renderer
        .create_buffer_init(&index_desc, sphere.index_bytes(), ResourceState::IndexBuffer)
        .context("Failed to upload sphere indices")?;

    let texture = checkerboard(256, 32, [230, 230, 230, 255], [40, 40, 48, 255]);
    renderer
        .create_texture_init(&texture.desc, &texture.bytes, ResourceState::ShaderResource)
        .context("Failed to upload checkerboard texture")?;

    info!(
        vertices = sphere.vertex_count(),
        triangles = sphere.triangle_count(),
        texture_mips = texture.desc.mip_levels,
        "Demo content uploaded"
    );
    Ok(())
}

/// 帧错误的处理结果
enum FrameOutcome {
    Rendered,
    /// 表面失效，需要重建交换链
    Rebuild,
    /// 超时，下一次迭代重试
    Retry,
}

fn classify(result: Result<(), RenderError>) -> anyhow::Result<FrameOutcome> {
    match result {
        Ok(()) => Ok(FrameOutcome::Rendered),
        Err(e) => match e.as_graphics() {
            Some(g) if g.needs_swapchain_rebuild() => {
                debug!(error = %g, "Surface invalidated, rebuilding swapchain");
                Ok(FrameOutcome::Rebuild)
            }
            Some(GraphicsError::AcquireTimeout { waited }) => {
                warn!(waited_ms = waited.as_millis() as u64, "Frame acquire timed out, retrying");
                Ok(FrameOutcome::Retry)
            }
            _ => Err(anyhow::Error::new(e).context("Frame rendering failed")),
        },
    }
}

fn run_headless(config: &Config) -> anyhow::Result<()> {
    let backend = create_backend(config, None).context("Failed to create headless backend")?;
    let mut renderer = Renderer::new(backend, config).context("Failed to initialize renderer")?;
    upload_demo_content(&mut renderer)?;

    let (width, height) = (config.headless.width, config.headless.height);
    let mut rendered = 0;
    while rendered < config.headless.frame_count {
        match classify(renderer.render_frame().map(|_| ()))? {
            FrameOutcome::Rendered => rendered += 1,
            FrameOutcome::Rebuild => renderer
                .rebuild_swapchain(width, height)
                .context("Failed to rebuild swapchain")?,
            FrameOutcome::Retry => {}
        }
    }

    let stats = renderer.frame_stats();
    info!(
        frames = stats.frames_presented,
        blocking_waits = stats.blocking_waits,
        discarded = stats.frames_discarded,
        "Headless run complete"
    );
    renderer.shutdown();
    Ok(())
}

/// 窗口模式的应用状态
///
/// 字段按析构顺序排列：渲染器（连同后端和表面）先于窗口释放。
struct App {
    renderer: Option<DynRenderer>,
    window: Window,
    /// 窗口最小化时暂停渲染
    minimized: bool,
    fatal: Option<anyhow::Error>,
}

impl App {
    fn render(&mut self) {
        if self.minimized {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        match classify(renderer.render_frame().map(|_| ())) {
            Ok(FrameOutcome::Rendered) | Ok(FrameOutcome::Retry) => {}
            Ok(FrameOutcome::Rebuild) => {
                let size = self.window.inner_size();
                self.resize(size.width, size.height);
            }
            Err(e) => self.fatal = Some(e),
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        self.minimized = width == 0 || height == 0;
        if self.minimized {
            debug!("Window minimized, rendering paused");
            return;
        }
        if let Some(renderer) = self.renderer.as_mut() {
            if let Err(e) = renderer.rebuild_swapchain(width, height) {
                self.fatal = Some(anyhow::Error::new(e).context("Failed to rebuild swapchain"));
            }
        }
    }

    fn handle_event(&mut self, event: Event<()>, target: &EventLoopWindowTarget<()>) {
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    info!("Close requested, shutting down...");
                    target.exit();
                }
                WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            logical_key: Key::Named(NamedKey::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    info!("Escape pressed, shutting down...");
                    target.exit();
                }
                WindowEvent::Resized(size) => {
                    debug!(width = size.width, height = size.height, "Window resized");
                    self.resize(size.width, size.height);
                }
                WindowEvent::RedrawRequested => self.render(),
                _ => {}
            },
            Event::AboutToWait => self.window.request_redraw(),
            _ => {}
        }

        if self.fatal.is_some() {
            target.exit();
        }
    }
}

fn run_windowed(config: &Config) -> anyhow::Result<()> {
    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    let window = WindowBuilder::new()
        .with_title(config.window.title.as_str())
        .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
        .build(&event_loop)
        .context("Failed to create window")?;

    let backend = create_backend(config, Some(&window))
        .with_context(|| format!("Failed to create {} backend", config.graphics.backend.name()))?;
    let mut renderer = Renderer::new(backend, config).context("Failed to initialize renderer")?;
    upload_demo_content(&mut renderer)?;

    let mut app = App {
        renderer: Some(renderer),
        window,
        minimized: false,
        fatal: None,
    };
    info!("Entering main loop...");
    event_loop
        .run(|event, target| app.handle_event(event, target))
        .context("Event loop failed")?;

    if let Some(mut renderer) = app.renderer.take() {
        let stats = renderer.frame_stats();
        info!(
            frames = stats.frames_presented,
            blocking_waits = stats.blocking_waits,
            "Main loop finished"
        );
        renderer.shutdown();
    }
    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
