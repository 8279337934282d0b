//! Application state and rendering
//!
//! Holds the wgpu graphics context, the forward-plus-bloom render chain, the
//! egui overlay, and the active particle session. The render tick runs here
//! at display rate; the camera and tracker threads feed the gesture cell at
//! their own pace and are only touched through non-blocking reads.

use std::sync::Arc;
use std::time::Instant;

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::animator::{Instance, ParticleField, StarPulse};
use crate::camera::CameraCapture;
use crate::config::SceneConfig;
use crate::formation::Formations;
use crate::gesture::{GestureCell, GestureLabel};
use crate::mesh::{self, MeshData, Vertex};
use crate::overlay::{self, OverlayAction, OverlaySnapshot};
use crate::tracker::HandTracker;

/// Offscreen HDR format the scene renders into before bloom and tone map.
const SCENE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const VERTEX_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3];

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CameraUniform {
    view_proj: [[f32; 4]; 4],
    position: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PointLight {
    /// xyz position, w unused.
    position: [f32; 4],
    /// rgb color, a intensity.
    color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LightsUniform {
    ambient: [f32; 4],
    lights: [PointLight; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ExtractParams {
    threshold: f32,
    _pad: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BlurParams {
    /// Premultiplied UV offset per blur tap.
    step: [f32; 2],
    _pad: [f32; 2],
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CompositeParams {
    strength: f32,
    _pad: [f32; 3],
}

/// Static perspective camera looking down the z axis at the origin.
fn camera_uniform(width: u32, height: u32) -> CameraUniform {
    let eye = Vec3::new(0.0, 0.0, 30.0);
    let aspect = width.max(1) as f32 / height.max(1) as f32;
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let proj = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, 1000.0);
    CameraUniform {
        view_proj: (proj * view).to_cols_array_2d(),
        position: [eye.x, eye.y, eye.z, 1.0],
    }
}

/// White ambient plus three colored point lights boxing the formation in.
fn lights_uniform() -> LightsUniform {
    LightsUniform {
        ambient: [1.0, 1.0, 1.0, 0.4],
        lights: [
            PointLight {
                position: [10.0, 10.0, 10.0, 1.0],
                color: [1.0, 0.843, 0.0, 2.0],
            },
            PointLight {
                position: [-10.0, -10.0, -10.0, 1.0],
                color: [1.0, 0.0, 0.0, 2.0],
            },
            PointLight {
                position: [0.0, 0.0, 5.0, 1.0],
                color: [0.314, 0.784, 0.471, 1.0],
            },
        ],
    }
}

fn blur_params(width: u32, height: u32, radius: f32) -> (BlurParams, BlurParams) {
    let half_w = (width / 2).max(1) as f32;
    let half_h = (height / 2).max(1) as f32;
    // Tap spacing in half-resolution texels.
    let spread = 1.0 + radius;
    (
        BlurParams {
            step: [spread / half_w, 0.0],
            _pad: [0.0; 2],
        },
        BlurParams {
            step: [0.0, spread / half_h],
            _pad: [0.0; 2],
        },
    )
}

/// One uploaded mesh, shared by all instances of a batch.
struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

fn upload_mesh(device: &wgpu::Device, label: &str, data: &MeshData) -> GpuMesh {
    let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(&data.vertices),
        usage: wgpu::BufferUsages::VERTEX,
    });
    let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(&data.indices),
        usage: wgpu::BufferUsages::INDEX,
    });
    GpuMesh {
        vertex_buffer,
        index_buffer,
        index_count: data.index_count(),
    }
}

fn create_depth_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Depth Texture"),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

fn create_hdr_texture(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    label: &str,
) -> (wgpu::Texture, wgpu::TextureView) {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: SCENE_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    (texture, view)
}

/// Post-processing pipelines and parameter buffers. Fixed for the lifetime
/// of the device; only the textures they run over change with window size.
struct PostStack {
    sampler: wgpu::Sampler,
    extract_pipeline: wgpu::RenderPipeline,
    blur_pipeline: wgpu::RenderPipeline,
    composite_pipeline: wgpu::RenderPipeline,
    extract_layout: wgpu::BindGroupLayout,
    blur_layout: wgpu::BindGroupLayout,
    composite_layout: wgpu::BindGroupLayout,
    extract_params: wgpu::Buffer,
    blur_h_params: wgpu::Buffer,
    blur_v_params: wgpu::Buffer,
    composite_params: wgpu::Buffer,
}

/// Size-dependent bloom targets and their bind groups, rebuilt on resize.
struct BloomChain {
    _bright_texture: wgpu::Texture,
    bright_view: wgpu::TextureView,
    _blur_textures: [wgpu::Texture; 2],
    blur_views: [wgpu::TextureView; 2],
    extract_group: wgpu::BindGroup,
    /// 0: bright -> A (horizontal), 1: A -> B (vertical), 2: B -> A
    /// (horizontal). The vertical group is reused for the second round.
    blur_groups: [wgpu::BindGroup; 3],
    composite_group: wgpu::BindGroup,
}

impl BloomChain {
    fn new(
        device: &wgpu::Device,
        post: &PostStack,
        scene_view: &wgpu::TextureView,
        width: u32,
        height: u32,
    ) -> Self {
        let half_w = (width / 2).max(1);
        let half_h = (height / 2).max(1);

        let (bright_texture, bright_view) =
            create_hdr_texture(device, half_w, half_h, "Bloom Bright Texture");
        let (blur_a, blur_a_view) = create_hdr_texture(device, half_w, half_h, "Bloom Texture A");
        let (blur_b, blur_b_view) = create_hdr_texture(device, half_w, half_h, "Bloom Texture B");

        let extract_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Extract Bind Group"),
            layout: &post.extract_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(scene_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&post.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: post.extract_params.as_entire_binding(),
                },
            ],
        });

        let blur_group = |source: &wgpu::TextureView, params: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Bloom Blur Bind Group"),
                layout: &post.blur_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(source),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&post.sampler),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: params.as_entire_binding(),
                    },
                ],
            })
        };
        let blur_groups = [
            blur_group(&bright_view, &post.blur_h_params),
            blur_group(&blur_a_view, &post.blur_v_params),
            blur_group(&blur_b_view, &post.blur_h_params),
        ];

        let composite_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Composite Bind Group"),
            layout: &post.composite_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(scene_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&blur_b_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&post.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: post.composite_params.as_entire_binding(),
                },
            ],
        });

        Self {
            _bright_texture: bright_texture,
            bright_view,
            _blur_textures: [blur_a, blur_b],
            blur_views: [blur_a_view, blur_b_view],
            extract_group,
            blur_groups,
            composite_group,
        }
    }
}

/// Everything owned by one mounted particle scene. Dropping the session
/// joins the camera and tracker threads, which releases the device and the
/// model before the renderer carries on with the intro screen.
struct SceneSession {
    field: ParticleField,
    star: StarPulse,
    cuboid_scratch: Vec<Instance>,
    sphere_scratch: Vec<Instance>,
    camera: Option<CameraCapture>,
    tracker: Option<HandTracker>,
    started_at: Instant,
    last_tracked_frame: Option<u64>,
}

/// Main application state.
pub struct App {
    window: Arc<Window>,
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    size: PhysicalSize<u32>,

    // Forward scene pass
    mesh_pipeline: wgpu::RenderPipeline,
    camera_buffer: wgpu::Buffer,
    cuboid_mesh: GpuMesh,
    sphere_mesh: GpuMesh,
    star_mesh: GpuMesh,
    cuboid_instances: wgpu::Buffer,
    sphere_instances: wgpu::Buffer,
    star_instance: wgpu::Buffer,
    cuboid_group: wgpu::BindGroup,
    sphere_group: wgpu::BindGroup,
    star_group: wgpu::BindGroup,
    _depth_texture: wgpu::Texture,
    depth_view: wgpu::TextureView,
    _scene_texture: wgpu::Texture,
    scene_view: wgpu::TextureView,

    // Bloom and composite
    post: PostStack,
    bloom: BloomChain,

    // Session state
    settings: SceneConfig,
    gesture: Arc<GestureCell>,
    scene: Option<SceneSession>,
    current_label: GestureLabel,

    // egui integration
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,

    // Frame timing
    fps: f64,
    last_fps_update: Instant,
    frames_since_update: u64,
}

impl App {
    /// Create a new App instance with initialized wgpu context.
    pub async fn new(window: Arc<Window>, settings: SceneConfig) -> Self {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance
            .create_surface(window.clone())
            .expect("Failed to create surface");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .expect("Failed to find suitable GPU adapter");

        log::info!("Using GPU: {}", adapter.get_info().name);
        log::info!("Backend: {:?}", adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Gesture Particles Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: adapter.limits(),
                    memory_hints: wgpu::MemoryHints::Performance,
                },
                None,
            )
            .await
            .expect("Failed to create device");

        let surface_caps = surface.get_capabilities(&adapter);

        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(surface_caps.formats[0]);

        log::info!("Surface format: {:?}", surface_format);

        // Redraws are paced by the event loop, so prefer a non-blocking
        // present mode over vsync.
        let present_mode = if surface_caps
            .present_modes
            .contains(&wgpu::PresentMode::Immediate)
        {
            wgpu::PresentMode::Immediate
        } else if surface_caps
            .present_modes
            .contains(&wgpu::PresentMode::Mailbox)
        {
            wgpu::PresentMode::Mailbox
        } else {
            wgpu::PresentMode::Fifo
        };

        log::info!("Present mode: {:?}", present_mode);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };

        surface.configure(&device, &config);

        // Scene geometry, shared by every instance of a batch
        let cuboid_mesh = upload_mesh(&device, "Cuboid Mesh", &mesh::cuboid());
        let sphere_mesh = upload_mesh(&device, "Sphere Mesh", &mesh::sphere(0.6, 8, 8));
        let star_mesh = upload_mesh(&device, "Star Mesh", &mesh::octahedron(1.0));

        let camera_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Camera Uniform"),
            contents: bytemuck::bytes_of(&camera_uniform(config.width, config.height)),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let lights_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Lights Uniform"),
            contents: bytemuck::bytes_of(&lights_uniform()),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        // Per-batch instance storage, rewritten every tick while a session
        // is active
        let cuboid_count = settings.particle_count / 2;
        let sphere_count = settings.particle_count - cuboid_count;
        let instance_size = std::mem::size_of::<Instance>() as u64;
        let make_instance_buffer = |label: &str, count: usize| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: count as u64 * instance_size,
                usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        };
        let cuboid_instances = make_instance_buffer("Cuboid Instances", cuboid_count);
        let sphere_instances = make_instance_buffer("Sphere Instances", sphere_count);
        let star_instance = make_instance_buffer("Star Instance", 1);

        let scene_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Scene Bind Group Layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::VERTEX,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: true },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let scene_group = |label: &str, instances: &wgpu::Buffer| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some(label),
                layout: &scene_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: camera_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: lights_buffer.as_entire_binding(),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2,
                        resource: instances.as_entire_binding(),
                    },
                ],
            })
        };
        let cuboid_group = scene_group("Cuboid Bind Group", &cuboid_instances);
        let sphere_group = scene_group("Sphere Bind Group", &sphere_instances);
        let star_group = scene_group("Star Bind Group", &star_instance);

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Instance Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/instance.wgsl").into()),
        });

        let mesh_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&scene_layout],
            push_constant_ranges: &[],
        });

        let mesh_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Pipeline"),
            layout: Some(&mesh_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &mesh_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &VERTEX_ATTRIBUTES,
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &mesh_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: SCENE_FORMAT,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        // Post-processing stack
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Post Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let texture_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };
        let uniform_entry = |binding: u32| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let extract_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Extract Layout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });
        let blur_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Bloom Blur Layout"),
            entries: &[texture_entry(0), sampler_entry(1), uniform_entry(2)],
        });
        let composite_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Composite Layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                sampler_entry(2),
                uniform_entry(3),
            ],
        });

        let extract_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Extract Params"),
            contents: bytemuck::bytes_of(&ExtractParams {
                threshold: settings.bloom.threshold,
                _pad: [0.0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let (blur_h, blur_v) = blur_params(config.width, config.height, settings.bloom.radius);
        let blur_h_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Blur H Params"),
            contents: bytemuck::bytes_of(&blur_h),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let blur_v_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Bloom Blur V Params"),
            contents: bytemuck::bytes_of(&blur_v),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let composite_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Composite Params"),
            contents: bytemuck::bytes_of(&CompositeParams {
                strength: settings.bloom.strength,
                _pad: [0.0; 3],
            }),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let fullscreen_pipeline = |label: &str,
                                   shader_source: &str,
                                   layout: &wgpu::BindGroupLayout,
                                   format: wgpu::TextureFormat| {
            let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(label),
                source: wgpu::ShaderSource::Wgsl(shader_source.into()),
            });
            let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(label),
                bind_group_layouts: &[layout],
                push_constant_ranges: &[],
            });
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(label),
                layout: Some(&pipeline_layout),
                vertex: wgpu::VertexState {
                    module: &shader,
                    entry_point: Some("vs_main"),
                    buffers: &[],
                    compilation_options: Default::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &shader,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format,
                        blend: Some(wgpu::BlendState::REPLACE),
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: Default::default(),
                }),
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    ..Default::default()
                },
                depth_stencil: None,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
                cache: None,
            })
        };

        let extract_pipeline = fullscreen_pipeline(
            "Bloom Extract Pipeline",
            include_str!("shaders/bloom_extract.wgsl"),
            &extract_layout,
            SCENE_FORMAT,
        );
        let blur_pipeline = fullscreen_pipeline(
            "Bloom Blur Pipeline",
            include_str!("shaders/bloom_blur.wgsl"),
            &blur_layout,
            SCENE_FORMAT,
        );
        let composite_pipeline = fullscreen_pipeline(
            "Composite Pipeline",
            include_str!("shaders/composite.wgsl"),
            &composite_layout,
            surface_format,
        );

        let post = PostStack {
            sampler,
            extract_pipeline,
            blur_pipeline,
            composite_pipeline,
            extract_layout,
            blur_layout,
            composite_layout,
            extract_params,
            blur_h_params,
            blur_v_params,
            composite_params,
        };

        let (depth_texture, depth_view) = create_depth_texture(&device, config.width, config.height);
        let (scene_texture, scene_view) =
            create_hdr_texture(&device, config.width, config.height, "Scene Texture");
        let bloom = BloomChain::new(&device, &post, &scene_view, config.width, config.height);

        // Initialize egui
        let egui_ctx = egui::Context::default();
        let mut style = (*egui_ctx.style()).clone();
        style.visuals.window_shadow = egui::epaint::Shadow::NONE;
        egui_ctx.set_style(style);

        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );

        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        let now = Instant::now();

        Self {
            window,
            surface,
            device,
            queue,
            config,
            size,
            mesh_pipeline,
            camera_buffer,
            cuboid_mesh,
            sphere_mesh,
            star_mesh,
            cuboid_instances,
            sphere_instances,
            star_instance,
            cuboid_group,
            sphere_group,
            star_group,
            _depth_texture: depth_texture,
            depth_view,
            _scene_texture: scene_texture,
            scene_view,
            post,
            bloom,
            settings,
            gesture: Arc::new(GestureCell::default()),
            scene: None,
            current_label: GestureLabel::Idle,
            egui_ctx,
            egui_state,
            egui_renderer,
            fps: 60.0,
            last_fps_update: now,
            frames_since_update: 0,
        }
    }

    /// Handle a window event, returning true if egui consumed it.
    pub fn handle_window_event(&mut self, event: &WindowEvent) -> bool {
        let response = self.egui_state.on_window_event(&self.window, event);
        response.consumed
    }

    /// Resize the surface and every size-dependent render target.
    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        if new_size.width > 0 && new_size.height > 0 {
            self.size = new_size;
            self.config.width = new_size.width;
            self.config.height = new_size.height;
            self.surface.configure(&self.device, &self.config);

            self.queue.write_buffer(
                &self.camera_buffer,
                0,
                bytemuck::bytes_of(&camera_uniform(new_size.width, new_size.height)),
            );
            let (blur_h, blur_v) =
                blur_params(new_size.width, new_size.height, self.settings.bloom.radius);
            self.queue
                .write_buffer(&self.post.blur_h_params, 0, bytemuck::bytes_of(&blur_h));
            self.queue
                .write_buffer(&self.post.blur_v_params, 0, bytemuck::bytes_of(&blur_v));

            let (depth_texture, depth_view) =
                create_depth_texture(&self.device, new_size.width, new_size.height);
            self._depth_texture = depth_texture;
            self.depth_view = depth_view;
            let (scene_texture, scene_view) = create_hdr_texture(
                &self.device,
                new_size.width,
                new_size.height,
                "Scene Texture",
            );
            self._scene_texture = scene_texture;
            self.scene_view = scene_view;
            self.bloom = BloomChain::new(
                &self.device,
                &self.post,
                &self.scene_view,
                new_size.width,
                new_size.height,
            );
        }
    }

    /// Get current size.
    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn session_active(&self) -> bool {
        self.scene.is_some()
    }

    /// Mount a particle scene: generate formations, open the camera, and
    /// start the hand tracker. Camera or tracker failure is logged and the
    /// scene runs without that input.
    pub fn start_session(&mut self) {
        if self.scene.is_some() {
            return;
        }
        log::info!(
            "Starting session ({} particles, nebula radius {})",
            self.settings.particle_count,
            self.settings.nebula_radius
        );

        for info in CameraCapture::list_cameras() {
            log::info!("Camera {}: {}", info.index, info.name);
        }

        self.gesture.set(GestureLabel::Idle);
        self.current_label = GestureLabel::Idle;

        let formations = Formations::generate(
            self.settings.particle_count,
            self.settings.nebula_radius,
            self.settings.tree_height,
            self.settings.tree_radius,
        );
        let field = ParticleField::new(formations);
        let cuboid_scratch = vec![Instance::zeroed(); field.cuboid_count()];
        let sphere_scratch = vec![Instance::zeroed(); field.sphere_count()];

        let camera = match CameraCapture::new(
            self.settings.camera_index,
            self.settings.capture_width,
            self.settings.capture_height,
        ) {
            Ok(c) => Some(c),
            Err(e) => {
                log::error!("Camera capture unavailable: {}", e);
                None
            }
        };
        let tracker = match HandTracker::new(self.gesture.clone()) {
            Ok(t) => Some(t),
            Err(e) => {
                log::warn!("Hand tracker unavailable: {}", e);
                None
            }
        };

        self.scene = Some(SceneSession {
            field,
            star: StarPulse::new(self.settings.tree_height),
            cuboid_scratch,
            sphere_scratch,
            camera,
            tracker,
            started_at: Instant::now(),
            last_tracked_frame: None,
        });
    }

    /// Tear the session down. Dropping it joins the capture and tracker
    /// threads, so the device and model are released when this returns.
    pub fn end_session(&mut self) {
        if self.scene.take().is_some() {
            log::info!("Session ended, camera and tracker released");
            self.gesture.set(GestureLabel::Idle);
            self.current_label = GestureLabel::Idle;
        }
    }

    /// Keyboard fallback: write a label through the same cell the tracker
    /// uses. The next tracker observation overrides it.
    pub fn force_gesture(&mut self, label: GestureLabel) {
        if self.scene.is_some() {
            log::info!("Forcing gesture {}", label.name());
            self.gesture.set(label);
        }
    }

    /// Drop and reopen the camera. The old device is released before the
    /// new open attempt starts.
    pub fn reconnect_camera(&mut self) {
        let Some(session) = self.scene.as_mut() else {
            return;
        };
        log::info!("Reconnecting camera {}", self.settings.camera_index);
        session.camera = None;
        session.camera = match CameraCapture::new(
            self.settings.camera_index,
            self.settings.capture_width,
            self.settings.capture_height,
        ) {
            Ok(c) => Some(c),
            Err(e) => {
                log::error!("Camera capture unavailable: {}", e);
                None
            }
        };
        session.last_tracked_frame = None;
    }

    /// Forward the newest camera frame to the tracker, skipping frames that
    /// were already classified. Never blocks: if the tracker is busy the
    /// frame is dropped.
    fn pump_tracker(&mut self) {
        let Some(session) = self.scene.as_mut() else {
            return;
        };
        let (Some(camera), Some(tracker)) = (session.camera.as_ref(), session.tracker.as_ref())
        else {
            return;
        };
        if let Some(frame) = camera.latest_frame() {
            if session.last_tracked_frame != Some(frame.frame_number) {
                session.last_tracked_frame = Some(frame.frame_number);
                tracker.process_frame(&frame.data, frame.width, frame.height, frame.frame_number);
            }
        }
    }

    /// Advance the animation one tick and upload the instance batches. The
    /// gesture cell is read exactly once per tick; animator, star, and
    /// overlay all see the same label.
    fn update_session(&mut self) {
        let label = self.gesture.get();
        self.current_label = label;

        let Some(session) = self.scene.as_mut() else {
            return;
        };
        let time = session.started_at.elapsed().as_secs_f32();

        session.field.step(
            label,
            time,
            &mut session.cuboid_scratch,
            &mut session.sphere_scratch,
        );
        let star = session.star.step(label, time);

        self.queue.write_buffer(
            &self.cuboid_instances,
            0,
            bytemuck::cast_slice(&session.cuboid_scratch),
        );
        self.queue.write_buffer(
            &self.sphere_instances,
            0,
            bytemuck::cast_slice(&session.sphere_scratch),
        );
        self.queue
            .write_buffer(&self.star_instance, 0, bytemuck::bytes_of(&star));
    }

    pub fn render(&mut self) -> Result<(), wgpu::SurfaceError> {
        self.pump_tracker();
        self.update_session();

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Render Encoder"),
            });

        let batch_counts = self.scene.as_ref().map(|session| {
            (
                session.field.cuboid_count() as u32,
                session.field.sphere_count() as u32,
            )
        });

        // Forward pass into the HDR scene texture. With no session active
        // this just clears to black and the composite shows the backdrop.
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.scene_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            if let Some((cuboid_count, sphere_count)) = batch_counts {
                render_pass.set_pipeline(&self.mesh_pipeline);

                render_pass.set_bind_group(0, &self.cuboid_group, &[]);
                render_pass.set_vertex_buffer(0, self.cuboid_mesh.vertex_buffer.slice(..));
                render_pass.set_index_buffer(
                    self.cuboid_mesh.index_buffer.slice(..),
                    wgpu::IndexFormat::Uint16,
                );
                render_pass.draw_indexed(0..self.cuboid_mesh.index_count, 0, 0..cuboid_count);

                render_pass.set_bind_group(0, &self.sphere_group, &[]);
                render_pass.set_vertex_buffer(0, self.sphere_mesh.vertex_buffer.slice(..));
                render_pass.set_index_buffer(
                    self.sphere_mesh.index_buffer.slice(..),
                    wgpu::IndexFormat::Uint16,
                );
                render_pass.draw_indexed(0..self.sphere_mesh.index_count, 0, 0..sphere_count);

                render_pass.set_bind_group(0, &self.star_group, &[]);
                render_pass.set_vertex_buffer(0, self.star_mesh.vertex_buffer.slice(..));
                render_pass.set_index_buffer(
                    self.star_mesh.index_buffer.slice(..),
                    wgpu::IndexFormat::Uint16,
                );
                render_pass.draw_indexed(0..self.star_mesh.index_count, 0, 0..1);
            }
        }

        // Bright-pass into the half-resolution chain
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Bloom Extract Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.bloom.bright_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.post.extract_pipeline);
            render_pass.set_bind_group(0, &self.bloom.extract_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        // Two rounds of separable blur, ping-ponging between A and B
        for (group_idx, target_idx) in [(0usize, 0usize), (1, 1), (2, 0), (1, 1)] {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Bloom Blur Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.bloom.blur_views[target_idx],
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.post.blur_pipeline);
            render_pass.set_bind_group(0, &self.bloom.blur_groups[group_idx], &[]);
            render_pass.draw(0..3, 0..1);
        }

        // Composite scene plus bloom onto the swapchain
        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Composite Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            render_pass.set_pipeline(&self.post.composite_pipeline);
            render_pass.set_bind_group(0, &self.bloom.composite_group, &[]);
            render_pass.draw(0..3, 0..1);
        }

        self.render_overlay(&mut encoder, &view);

        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();

        self.update_fps();

        Ok(())
    }

    /// Run egui for this frame and draw it over the composited scene.
    fn render_overlay(&mut self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView) {
        let snapshot = OverlaySnapshot {
            session_active: self.scene.is_some(),
            label: self.current_label,
            fps: self.fps,
            particle_count: self.settings.particle_count,
            camera: self
                .scene
                .as_ref()
                .and_then(|s| s.camera.as_ref())
                .map(|c| c.status()),
            camera_frames: self
                .scene
                .as_ref()
                .and_then(|s| s.camera.as_ref())
                .map(|c| c.frame_count())
                .unwrap_or(0),
            tracker_ready: self
                .scene
                .as_ref()
                .and_then(|s| s.tracker.as_ref())
                .map(|t| t.is_ready())
                .unwrap_or(false),
            observation: self
                .scene
                .as_ref()
                .and_then(|s| s.tracker.as_ref())
                .and_then(|t| t.latest_observation()),
        };

        let raw_input = self.egui_state.take_egui_input(&self.window);
        let mut action = OverlayAction::default();
        let full_output = self.egui_ctx.run(raw_input, |ctx| {
            action = overlay::draw(ctx, &snapshot);
        });

        self.egui_state
            .handle_platform_output(&self.window, full_output.platform_output);

        let paint_jobs = self
            .egui_ctx
            .tessellate(full_output.shapes, full_output.pixels_per_point);

        for (id, image_delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, image_delta);
        }

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point: self.window.scale_factor() as f32,
        };

        self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            encoder,
            &paint_jobs,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("egui Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let render_pass_static: &mut wgpu::RenderPass<'static> =
                unsafe { std::mem::transmute(&mut render_pass) };

            self.egui_renderer
                .render(render_pass_static, &paint_jobs, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        if action.start_session {
            self.start_session();
        }
        if action.end_session {
            self.end_session();
        }
        if action.reconnect_camera {
            self.reconnect_camera();
        }
    }

    fn update_fps(&mut self) {
        self.frames_since_update += 1;

        let now = Instant::now();
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f64();
        if elapsed >= 1.0 {
            self.fps = self.frames_since_update as f64 / elapsed;
            self.frames_since_update = 0;
            self.last_fps_update = now;
        }
    }
}
