use std::{io::Cursor, mem, sync::Arc, time::Duration};

use ash::vk;
use gfx_hal::{
    device::Device, error::GfxHalError, instance::Instance, surface::Surface,
    swapchain::choose_extent, swapchain::Swapchain, swapchain::SwapchainConfig, sync::Fence,
    sync::Semaphore,
};
use gpu_allocator::MemoryLocation;
use resource_manager::{BufferHandle, ImageHandle, ResourceManager, ResourceManagerError};
use scene::Scene;
use shared::{CameraInfo, PushConstants, UniformBufferObject};
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

const MAX_FRAMES_IN_FLIGHT: usize = 2;

const VERT_SHADER_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shaders/sphere.vert.spv"));
const FRAG_SHADER_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/shaders/sphere.frag.spv"));

const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

#[derive(Debug, Error)]
pub enum RendererError {
    #[error("Graphics HAL Error: {0}")]
    GfxHal(#[from] GfxHalError),
    #[error("Resource Manager Error: {0}")]
    ResourceManager(#[from] ResourceManagerError),
    #[error("Vulkan Error: {0}")]
    Vulkan(#[from] vk::Result),
    #[error("Invalid SPIR-V: {0}")]
    InvalidSpirv(#[from] std::io::Error),
    #[error("Failed to create shader module: {0}")]
    ShaderCreation(vk::Result),
    #[error("Failed to create pipeline layout: {0}")]
    PipelineLayoutCreation(vk::Result),
    #[error("Failed to create graphics pipeline: {0}")]
    PipelineCreation(vk::Result),
    #[error("Failed to create command pool: {0}")]
    CommandPoolCreation(vk::Result),
    #[error("Failed to allocate command buffers: {0}")]
    CommandBufferAllocation(vk::Result),
    #[error("No supported depth format")]
    NoDepthFormat,
}

pub type Result<T, E = RendererError> = std::result::Result<T, E>;

/// Options that stay fixed for the renderer's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Cull back faces (counter-clockwise triangles are front facing).
    pub cull_back_faces: bool,
    pub clear_color: [f32; 4],
    pub camera: CameraInfo,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            cull_back_faces: true,
            clear_color: [0.2, 0.3, 0.4, 1.0],
            camera: CameraInfo::default(),
        }
    }
}

impl RendererConfig {
    pub fn cull_mode(&self) -> vk::CullModeFlags {
        if self.cull_back_faces {
            vk::CullModeFlags::BACK
        } else {
            vk::CullModeFlags::NONE
        }
    }
}

struct FrameData {
    command_pool: vk::CommandPool,
    command_buffer: vk::CommandBuffer,
    image_available_semaphore: Semaphore,
    in_flight_fence: Fence,

    descriptor_set: vk::DescriptorSet,
    uniform_buffer: BufferHandle,
    /// Last contents written to `uniform_buffer`.
    uniform_buffer_object: Option<UniformBufferObject>,
}

/// Draws a [`Scene`] into a window surface, two frames in flight.
pub struct Renderer {
    device: Arc<Device>,
    resource_manager: Arc<ResourceManager>,

    surface: Arc<Surface>,
    swapchain: Swapchain,

    scene: Scene,
    config: RendererConfig,

    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_pool: vk::DescriptorPool,

    depth_format: vk::Format,
    depth_image_handle: ImageHandle,
    depth_image_view: vk::ImageView,

    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,

    frames_data: Vec<FrameData>,
    /// Signaled by the submit, waited on by the present. One per swapchain
    /// image, since a frame fence says nothing about the present being done.
    render_finished_semaphores: Vec<Semaphore>,
    current_frame: usize,
    swapchain_dirty: bool,
    current_width: u32,
    current_height: u32,
}

impl Renderer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: Arc<Surface>,
        resource_manager: Arc<ResourceManager>,
        scene: Scene,
        config: RendererConfig,
        initial_width: u32,
        initial_height: u32,
    ) -> Result<Self> {
        info!("Initializing Renderer...");

        let swapchain = unsafe {
            Swapchain::new(
                device.clone(),
                &surface,
                &SwapchainConfig::for_window(initial_width, initial_height),
                None,
            )?
        };

        let depth_format = Self::find_depth_format(instance, &device)?;
        let depth_image_handle =
            Self::create_depth_image(&resource_manager, swapchain.extent(), depth_format)?;
        let depth_image_view = Self::depth_view(&resource_manager, depth_image_handle)?;

        let descriptor_set_layout = Self::create_descriptor_set_layout(&device)?;
        let descriptor_pool = Self::create_descriptor_pool(&device)?;

        let (pipeline_layout, pipeline) = Self::create_pipeline(
            &device,
            swapchain.format().format,
            depth_format,
            &[descriptor_set_layout],
            config.cull_mode(),
        )?;

        let frames_data = Self::create_frame_data(
            &device,
            &resource_manager,
            descriptor_pool,
            descriptor_set_layout,
        )?;
        let render_finished_semaphores =
            per_image(swapchain.image_count(), || Semaphore::new(device.clone()))?;

        info!(
            "Renderer initialized ({}x{}, depth {:?}, culling {:?}).",
            swapchain.extent().width,
            swapchain.extent().height,
            depth_format,
            config.cull_mode()
        );

        Ok(Self {
            device,
            resource_manager,
            surface,
            swapchain,
            scene,
            config,
            descriptor_set_layout,
            descriptor_pool,
            depth_format,
            depth_image_handle,
            depth_image_view,
            pipeline_layout,
            pipeline,
            frames_data,
            render_finished_semaphores,
            current_frame: 0,
            swapchain_dirty: false,
            current_width: initial_width,
            current_height: initial_height,
        })
    }

    /// Schedules a swapchain rebuild for the new window size before the next frame.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.swapchain_dirty = true;
            self.current_width = width;
            self.current_height = height;
            debug!("Window resize requested to {}x{}", width, height);
        } else {
            debug!("Ignoring resize to 0 dimensions");
        }
    }

    /// Records, submits and presents one frame with the scene rotated to `elapsed`.
    pub fn render_frame(&mut self, elapsed: Duration) -> Result<()> {
        if self.swapchain_dirty {
            if self.recreate_swapchain()? {
                self.swapchain_dirty = false;
            }
            return Ok(());
        }

        let frame_index = self.current_frame;
        self.frames_data[frame_index].in_flight_fence.wait(None)?;

        let acquired = unsafe {
            let frame_data = &self.frames_data[frame_index];
            self.swapchain
                .acquire_next_image(u64::MAX, Some(&frame_data.image_available_semaphore), None)
        };
        let image_index = match acquired {
            Ok((image_index, suboptimal)) => {
                // A suboptimal image is still presentable; rebuild after this frame.
                if suboptimal {
                    warn!("Swapchain is suboptimal, scheduling recreation.");
                    self.swapchain_dirty = true;
                }
                image_index
            }
            Err(GfxHalError::SurfaceLost) => {
                warn!("Swapchain is out of date, scheduling recreation.");
                self.swapchain_dirty = true;
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        // Only reset once work is guaranteed to be submitted with it.
        self.frames_data[frame_index].in_flight_fence.reset()?;

        self.update_uniform_buffer()?;

        let command_buffer = self.frames_data[frame_index].command_buffer;
        unsafe {
            self.device.raw().reset_command_pool(
                self.frames_data[frame_index].command_pool,
                vk::CommandPoolResetFlags::empty(),
            )?;
            let begin_info = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device
                .raw()
                .begin_command_buffer(command_buffer, &begin_info)?;
        }

        self.record_commands(command_buffer, image_index, elapsed)?;

        unsafe {
            self.device.raw().end_command_buffer(command_buffer)?;
        }

        let frame_data = &self.frames_data[frame_index];
        let wait_semaphores = [frame_data.image_available_semaphore.handle()];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [self.render_finished_semaphores[image_index as usize].handle()];
        let command_buffers = [command_buffer];

        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.graphics_queue().submit(
                &self.device,
                &[submit_info],
                Some(&frame_data.in_flight_fence),
            )?;
        }

        let presented = unsafe {
            self.swapchain
                .present(self.device.present_queue(), image_index, &signal_semaphores)
        };
        match presented {
            Ok(false) => {}
            Ok(true) | Err(GfxHalError::SurfaceLost) => {
                warn!("Swapchain is out of date or suboptimal after present, scheduling recreation.");
                self.swapchain_dirty = true;
            }
            Err(e) => return Err(e.into()),
        }

        self.current_frame = (self.current_frame + 1) % MAX_FRAMES_IN_FLIGHT;
        Ok(())
    }

    fn record_commands(
        &self,
        command_buffer: vk::CommandBuffer,
        image_index: u32,
        elapsed: Duration,
    ) -> Result<()> {
        let device = self.device.raw();
        let extent = self.swapchain.extent();
        let swapchain_image = self.swapchain.images()[image_index as usize];
        let swapchain_view = self.swapchain.image_views()[image_index as usize];
        let depth_image = self
            .resource_manager
            .get_image_info(self.depth_image_handle)?
            .image;

        let to_attachment = [
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::empty())
                .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(swapchain_image)
                .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR)),
            vk::ImageMemoryBarrier::default()
                .src_access_mask(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
                .dst_access_mask(
                    vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                        | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
                )
                .old_layout(vk::ImageLayout::UNDEFINED)
                .new_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                .image(depth_image)
                .subresource_range(subresource_range(depth_aspect(self.depth_format))),
        ];

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
                    | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &to_attachment,
            );
        }

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(swapchain_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.config.clear_color,
                },
            });

        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(self.depth_image_view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::DONT_CARE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            });

        let rendering_info = vk::RenderingInfo::default()
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            })
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };
        let scissor = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent,
        };

        let frame_data = &self.frames_data[self.current_frame];
        unsafe {
            device.cmd_begin_rendering(command_buffer, &rendering_info);
            device.cmd_set_viewport(command_buffer, 0, &[viewport]);
            device.cmd_set_scissor(command_buffer, 0, &[scissor]);
            device.cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, self.pipeline);
            device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                self.pipeline_layout,
                0,
                &[frame_data.descriptor_set],
                &[],
            );
        }

        for mesh in &self.scene.meshes {
            let push_constants = PushConstants {
                model: self.scene.model_matrix(mesh, elapsed),
                color: mesh.color,
            };
            unsafe {
                device.cmd_push_constants(
                    command_buffer,
                    self.pipeline_layout,
                    vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                    0,
                    bytemuck::bytes_of(&push_constants),
                );
            }
            trace!("Drawing mesh '{}'", mesh.name);
            mesh.geometry.draw(device, command_buffer)?;
        }

        unsafe {
            device.cmd_end_rendering(command_buffer);
        }

        let to_present = vk::ImageMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
            .dst_access_mask(vk::AccessFlags::empty())
            .old_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(swapchain_image)
            .subresource_range(subresource_range(vk::ImageAspectFlags::COLOR));

        unsafe {
            device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
                vk::PipelineStageFlags::BOTTOM_OF_PIPE,
                vk::DependencyFlags::empty(),
                &[],
                &[],
                &[to_present],
            );
        }

        Ok(())
    }

    fn update_uniform_buffer(&mut self) -> Result<()> {
        let ubo = self
            .config
            .camera
            .uniform_buffer_object(aspect_ratio(self.swapchain.extent()));

        let frame_data = &mut self.frames_data[self.current_frame];
        if frame_data.uniform_buffer_object != Some(ubo) {
            self.resource_manager
                .write_buffer(frame_data.uniform_buffer, 0, bytemuck::bytes_of(&ubo))?;
            frame_data.uniform_buffer_object = Some(ubo);
        }
        Ok(())
    }

    /// Rebuilds the swapchain and everything sized after it. Returns `false`
    /// without touching anything while the surface has no area (minimized).
    fn recreate_swapchain(&mut self) -> Result<bool> {
        let config = SwapchainConfig::for_window(self.current_width, self.current_height);
        let capabilities = unsafe {
            self.surface
                .get_physical_device_surface_capabilities(self.device.physical_device_handle())?
        };
        let extent = choose_extent(&capabilities, config.extent);
        if has_zero_area(extent) {
            trace!("Surface extent is {:?}, postponing swapchain recreation.", extent);
            return Ok(false);
        }

        info!("Recreating swapchain...");
        self.device.wait_idle()?;

        let new_swapchain = unsafe {
            Swapchain::new(
                self.device.clone(),
                &self.surface,
                &config,
                Some(&self.swapchain),
            )?
        };
        // Dropping the old swapchain destroys it and its views.
        self.swapchain = new_swapchain;
        self.render_finished_semaphores = per_image(self.swapchain.image_count(), || {
            Semaphore::new(self.device.clone())
        })?;

        self.resource_manager.destroy_image(self.depth_image_handle)?;
        self.depth_image_handle = Self::create_depth_image(
            &self.resource_manager,
            self.swapchain.extent(),
            self.depth_format,
        )?;
        self.depth_image_view = Self::depth_view(&self.resource_manager, self.depth_image_handle)?;

        info!(
            "Swapchain recreated successfully ({}x{}).",
            self.swapchain.extent().width,
            self.swapchain.extent().height
        );
        Ok(true)
    }

    fn find_depth_format(instance: &Instance, device: &Device) -> Result<vk::Format> {
        choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |format| {
            let props = unsafe {
                instance
                    .ash_instance()
                    .get_physical_device_format_properties(device.physical_device_handle(), format)
            };
            props
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
        })
        .ok_or(RendererError::NoDepthFormat)
    }

    fn create_depth_image(
        resource_manager: &ResourceManager,
        extent: vk::Extent2D,
        depth_format: vk::Format,
    ) -> Result<ImageHandle> {
        let image_create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(depth_format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .samples(vk::SampleCountFlags::TYPE_1)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        Ok(resource_manager.create_image(
            &image_create_info,
            MemoryLocation::GpuOnly,
            depth_aspect(depth_format),
        )?)
    }

    fn depth_view(resource_manager: &ResourceManager, handle: ImageHandle) -> Result<vk::ImageView> {
        let view_handle = resource_manager.get_image_info(handle)?.default_view_handle;
        Ok(resource_manager.get_image_view_info(view_handle)?.view)
    }

    fn create_descriptor_set_layout(device: &Device) -> Result<vk::DescriptorSetLayout> {
        let ubo_layout_binding = vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX);

        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(std::slice::from_ref(&ubo_layout_binding));

        Ok(unsafe {
            device
                .raw()
                .create_descriptor_set_layout(&layout_info, None)?
        })
    }

    fn create_descriptor_pool(device: &Device) -> Result<vk::DescriptorPool> {
        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: MAX_FRAMES_IN_FLIGHT as u32,
        }];

        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .pool_sizes(&pool_sizes)
            .max_sets(MAX_FRAMES_IN_FLIGHT as u32);

        Ok(unsafe { device.raw().create_descriptor_pool(&pool_info, None)? })
    }

    fn create_pipeline(
        device: &Device,
        color_format: vk::Format,
        depth_format: vk::Format,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        cull_mode: vk::CullModeFlags,
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
        let vert_module = Self::create_shader_module(device, VERT_SHADER_SPV)?;
        let frag_module = match Self::create_shader_module(device, FRAG_SHADER_SPV) {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.raw().destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let result = Self::create_pipeline_with_modules(
            device,
            vert_module,
            frag_module,
            color_format,
            depth_format,
            descriptor_set_layouts,
            cull_mode,
        );

        unsafe {
            device.raw().destroy_shader_module(vert_module, None);
            device.raw().destroy_shader_module(frag_module, None);
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    fn create_pipeline_with_modules(
        device: &Device,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
        color_format: vk::Format,
        depth_format: vk::Format,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
        cull_mode: vk::CullModeFlags,
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
        let main_function_name = c"main";

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(main_function_name),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(main_function_name),
        ];

        let binding_description = shared::vertex_binding_description();
        let attribute_descriptions = shared::vertex_attribute_descriptions();

        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(std::slice::from_ref(&binding_description))
            .vertex_attribute_descriptions(&attribute_descriptions);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic.
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        // The projection flips Y, which keeps CCW-from-outside triangles CCW on screen.
        let rasterizer = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(cull_mode)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(true)
            .depth_write_enable(true)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::default()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false);

        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(std::slice::from_ref(&color_blend_attachment));

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(PushConstants::SIZE);

        let layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(descriptor_set_layouts)
            .push_constant_ranges(std::slice::from_ref(&push_constant_range));
        let pipeline_layout = unsafe {
            device
                .raw()
                .create_pipeline_layout(&layout_info, None)
                .map_err(RendererError::PipelineLayoutCreation)?
        };

        let mut pipeline_rendering_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(std::slice::from_ref(&color_format))
            .depth_attachment_format(depth_format);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .push_next(&mut pipeline_rendering_info);

        let pipelines = unsafe {
            device
                .raw()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        match pipelines {
            Ok(pipelines) => Ok((pipeline_layout, pipelines[0])),
            Err((_, e)) => {
                unsafe { device.raw().destroy_pipeline_layout(pipeline_layout, None) };
                Err(RendererError::PipelineCreation(e))
            }
        }
    }

    fn create_shader_module(device: &Device, code: &[u8]) -> Result<vk::ShaderModule> {
        let words = ash::util::read_spv(&mut Cursor::new(code))?;
        let create_info = vk::ShaderModuleCreateInfo::default().code(&words);

        unsafe {
            device
                .raw()
                .create_shader_module(&create_info, None)
                .map_err(|e| {
                    error!("Failed to create shader module: {:?}", e);
                    RendererError::ShaderCreation(e)
                })
        }
    }

    fn create_frame_data(
        device: &Arc<Device>,
        resource_manager: &ResourceManager,
        descriptor_pool: vk::DescriptorPool,
        descriptor_set_layout: vk::DescriptorSetLayout,
    ) -> Result<Vec<FrameData>> {
        let mut frames_data = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);

        let layouts = [descriptor_set_layout; MAX_FRAMES_IN_FLIGHT];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(descriptor_pool)
            .set_layouts(&layouts);
        let descriptor_sets = unsafe { device.raw().allocate_descriptor_sets(&alloc_info)? };

        for descriptor_set in descriptor_sets {
            let image_available_semaphore = Semaphore::new(device.clone())?;
            let in_flight_fence = Fence::new(device.clone(), true)?;

            let pool_info = vk::CommandPoolCreateInfo::default()
                .flags(vk::CommandPoolCreateFlags::TRANSIENT)
                .queue_family_index(device.graphics_queue_family_index());
            let command_pool = unsafe {
                device
                    .raw()
                    .create_command_pool(&pool_info, None)
                    .map_err(RendererError::CommandPoolCreation)?
            };

            let alloc_info = vk::CommandBufferAllocateInfo::default()
                .command_pool(command_pool)
                .level(vk::CommandBufferLevel::PRIMARY)
                .command_buffer_count(1);
            let command_buffer = match unsafe { device.raw().allocate_command_buffers(&alloc_info) } {
                Ok(buffers) => buffers[0],
                Err(e) => {
                    unsafe { device.raw().destroy_command_pool(command_pool, None) };
                    return Err(RendererError::CommandBufferAllocation(e));
                }
            };

            let uniform_buffer = resource_manager.create_buffer(
                mem::size_of::<UniformBufferObject>() as vk::DeviceSize,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                MemoryLocation::CpuToGpu,
            )?;
            let buffer = resource_manager.get_buffer_info(uniform_buffer)?.buffer;
            Self::write_descriptor_set(device, descriptor_set, buffer);

            debug!(
                "Frame data ready: command buffer {:?}, uniform buffer {:?}",
                command_buffer, uniform_buffer
            );

            frames_data.push(FrameData {
                command_pool,
                command_buffer,
                image_available_semaphore,
                in_flight_fence,
                descriptor_set,
                uniform_buffer,
                uniform_buffer_object: None,
            });
        }
        Ok(frames_data)
    }

    fn write_descriptor_set(device: &Device, descriptor_set: vk::DescriptorSet, buffer: vk::Buffer) {
        let buffer_info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(mem::size_of::<UniformBufferObject>() as vk::DeviceSize);

        let descriptor_write = vk::WriteDescriptorSet::default()
            .dst_set(descriptor_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .buffer_info(std::slice::from_ref(&buffer_info));

        unsafe {
            device
                .raw()
                .update_descriptor_sets(std::slice::from_ref(&descriptor_write), &[]);
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        info!("Dropping Renderer...");
        if let Err(e) = self.device.wait_idle() {
            error!("Error waiting for device idle during drop: {}", e);
        }

        unsafe {
            self.device.raw().destroy_pipeline(self.pipeline, None);
            self.device
                .raw()
                .destroy_pipeline_layout(self.pipeline_layout, None);
            self.device
                .raw()
                .destroy_descriptor_pool(self.descriptor_pool, None);
            self.device
                .raw()
                .destroy_descriptor_set_layout(self.descriptor_set_layout, None);
        }

        for frame_data in self.frames_data.drain(..) {
            if let Err(e) = self.resource_manager.destroy_buffer(frame_data.uniform_buffer) {
                error!("Failed to destroy uniform buffer: {}", e);
            }
            unsafe {
                self.device
                    .raw()
                    .destroy_command_pool(frame_data.command_pool, None);
            }
        }

        if let Err(e) = self.resource_manager.destroy_image(self.depth_image_handle) {
            error!("Failed to destroy depth image: {}", e);
        }

        info!("Renderer dropped.");
    }
}

/// First candidate accepted by `is_supported`, in order of preference.
fn choose_depth_format(
    candidates: &[vk::Format],
    mut is_supported: impl FnMut(vk::Format) -> bool,
) -> Option<vk::Format> {
    candidates.iter().copied().find(|&format| is_supported(format))
}

fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT
        | vk::Format::D24_UNORM_S8_UINT
        | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Builds one `T` per swapchain image, stopping at the first failure.
fn per_image<T, E>(
    image_count: usize,
    mut make: impl FnMut() -> std::result::Result<T, E>,
) -> std::result::Result<Vec<T>, E> {
    (0..image_count).map(|_| make()).collect()
}

/// A minimized window reports a 0x0 surface; no swapchain can be made for it.
fn has_zero_area(extent: vk::Extent2D) -> bool {
    extent.width == 0 || extent.height == 0
}

fn aspect_ratio(extent: vk::Extent2D) -> f32 {
    extent.width as f32 / extent.height.max(1) as f32
}

fn subresource_range(aspect_mask: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: 0,
        level_count: 1,
        base_array_layer: 0,
        layer_count: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_the_demo() {
        let config = RendererConfig::default();
        assert!(config.cull_back_faces);
        assert_eq!(config.clear_color, [0.2, 0.3, 0.4, 1.0]);
        assert_eq!(config.camera, CameraInfo::default());
        assert_eq!(config.cull_mode(), vk::CullModeFlags::BACK);
    }

    #[test]
    fn culling_can_be_disabled() {
        let config = RendererConfig {
            cull_back_faces: false,
            ..Default::default()
        };
        assert_eq!(config.cull_mode(), vk::CullModeFlags::NONE);
    }

    #[test]
    fn depth_format_prefers_earlier_candidates() {
        let any = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| true);
        assert_eq!(any, Some(vk::Format::D32_SFLOAT));

        let no_d32 = choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |f| {
            f != vk::Format::D32_SFLOAT
        });
        assert_eq!(no_d32, Some(vk::Format::D32_SFLOAT_S8_UINT));

        assert_eq!(choose_depth_format(&DEPTH_FORMAT_CANDIDATES, |_| false), None);
    }

    #[test]
    fn stencil_formats_include_the_stencil_aspect() {
        assert_eq!(
            depth_aspect(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            depth_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn aspect_ratio_survives_zero_height() {
        let extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert!((aspect_ratio(extent) - 4.0 / 3.0).abs() < 1e-6);

        let collapsed = vk::Extent2D {
            width: 800,
            height: 0,
        };
        assert!(aspect_ratio(collapsed).is_finite());
    }

    #[test]
    fn minimized_surface_postpones_recreation() {
        // What a minimized window on Windows reports.
        let minimized = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 0,
                height: 0,
            },
            ..Default::default()
        };
        let desired = vk::Extent2D {
            width: 800,
            height: 600,
        };
        assert!(has_zero_area(choose_extent(&minimized, desired)));

        assert!(has_zero_area(vk::Extent2D {
            width: 800,
            height: 0,
        }));
        assert!(!has_zero_area(desired));
    }

    #[test]
    fn per_image_builds_one_item_per_image() {
        let mut next = 0;
        let items: Vec<u32> = per_image(3, || {
            next += 1;
            Ok::<_, ()>(next)
        })
        .unwrap();
        assert_eq!(items, [1, 2, 3]);

        let mut calls = 0;
        let failed = per_image(3, || {
            calls += 1;
            if calls == 2 {
                Err("out of memory")
            } else {
                Ok(calls)
            }
        });
        assert_eq!(failed, Err("out of memory"));
        assert_eq!(calls, 2);
    }

    #[test]
    fn embedded_shaders_are_valid_spirv() {
        for code in [VERT_SHADER_SPV, FRAG_SHADER_SPV] {
            let words = ash::util::read_spv(&mut Cursor::new(code)).unwrap();
            assert_eq!(words[0], 0x0723_0203);
        }
    }
}
